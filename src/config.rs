//! Engine configuration.
//!
//! Every threshold, weight and keyword list the scorers consult lives here so
//! deployments can retune the engine without code changes. `Default` carries
//! the tuned values the engine ships with; `from_toml_file` overlays a TOML
//! file on top of those defaults (absent keys keep their default).

use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Engine configuration. Construct once and share via `Arc`; hot-swapping is
/// building a new config and rebuilding the classifier from it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriageConfig {
    /// Promotional decision threshold on the combined [0,1] scale.
    pub promo_threshold: f64,
    /// Importance decision threshold on the rule 0..10 scale.
    pub importance_threshold: f64,
    /// Base threshold for the rule-based promotional scorer (rule scale).
    pub promo_base_threshold: f64,
    /// Combined importance at which promotional analysis is constrained.
    pub importance_skip_threshold: f64,
    /// Combined importance at which promotional analysis is bypassed entirely.
    pub importance_fast_skip_threshold: f64,

    /// Weight of the embedding signal in score fusion.
    pub embedding_weight: f64,
    /// Weight of the rule signal in score fusion.
    pub rules_weight: f64,

    /// Embedding confidence below which predictions are distrusted.
    pub min_confidence: f64,
    /// Rule/embedding disagreement above which the combiner turns conservative.
    pub disagreement_limit: f64,
    /// Half-width of the borderline band around the effective threshold.
    pub borderline_band: f64,
    /// Threshold reduction applied on high embedding confidence.
    pub high_confidence_reduction: f64,
    /// Threshold increase applied on low embedding confidence.
    pub low_confidence_increase: f64,
    /// Hard bound on confidence-driven threshold movement in either direction.
    pub max_threshold_adjustment: f64,
    /// Rule importance above which a borderline-promotional call flips back
    /// to kept. Deliberately independent of `importance_threshold`.
    pub borderline_importance_override: f64,

    /// Penalty per promotional indicator found while scoring importance.
    pub promotional_penalty: f64,
    /// Truncation length for body content analysis.
    pub max_content_analysis_len: usize,

    /// Sliding window for sender cadence analysis, in days.
    pub temporal_window_days: u32,
    /// Minimum observations before cadence analysis is meaningful.
    pub temporal_min_observations: usize,
    /// Regularity score above which a sender cadence counts as newsletter-like.
    pub temporal_regularity_threshold: f64,

    /// Thread context cache TTL in seconds.
    pub context_cache_ttl_secs: u64,
    /// Hard cap on cached thread contexts (oldest-by-access evicted).
    pub context_cache_capacity: usize,
    /// Maximum thread messages fetched per context analysis.
    pub max_thread_messages: usize,

    /// Senders exempt from all scoring: unconditionally important.
    pub whitelist: Vec<String>,
    /// Keywords marking critical subjects/content.
    pub critical_keywords: Vec<String>,
    /// Sender substrings marking critical services.
    pub critical_senders: Vec<String>,
    /// Sender substrings typical of promotional mail.
    pub promotional_senders: Vec<String>,
    /// Subject keywords typical of promotional mail.
    pub promotional_subjects: Vec<String>,
    /// Regex patterns for promotional content.
    pub promotional_patterns: Vec<String>,
    /// Regex patterns for transactional mail (orders, receipts, alerts).
    pub transactional_patterns: Vec<String>,
    /// Services never classified as promotional.
    pub protected_services: Vec<String>,
    /// Subject prefixes marking replies/forwards.
    pub response_patterns: Vec<String>,
    /// Sender substrings marking no-reply addresses.
    pub no_reply_patterns: Vec<String>,
}

impl TriageConfig {
    /// Load configuration from a TOML file, overlaying defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges and compile every configured pattern once.
    pub fn validate(&self) -> Result<()> {
        fn unit_range(key: &str, value: f64) -> std::result::Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{value} is outside [0, 1]"),
                })
            }
        }

        unit_range("promo_threshold", self.promo_threshold)?;
        unit_range("embedding_weight", self.embedding_weight)?;
        unit_range("rules_weight", self.rules_weight)?;
        unit_range("min_confidence", self.min_confidence)?;
        unit_range("disagreement_limit", self.disagreement_limit)?;
        unit_range("borderline_band", self.borderline_band)?;
        unit_range("max_threshold_adjustment", self.max_threshold_adjustment)?;

        if self.embedding_weight + self.rules_weight <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "rules_weight".to_string(),
                message: "embedding_weight + rules_weight must be positive".to_string(),
            }
            .into());
        }
        if self.importance_fast_skip_threshold < self.importance_skip_threshold {
            return Err(ConfigError::InvalidValue {
                key: "importance_fast_skip_threshold".to_string(),
                message: "fast-skip threshold must be >= skip threshold".to_string(),
            }
            .into());
        }

        for pattern in self
            .promotional_patterns
            .iter()
            .chain(self.transactional_patterns.iter())
        {
            compile_pattern(pattern)?;
        }
        Ok(())
    }
}

/// Compile one configured pattern, case-insensitively.
pub(crate) fn compile_pattern(pattern: &str) -> std::result::Result<Regex, ConfigError> {
    Regex::new(&format!("(?i){pattern}")).map_err(|source| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            promo_threshold: 0.55,
            importance_threshold: 4.5,
            promo_base_threshold: 6.0,
            importance_skip_threshold: 5.5,
            importance_fast_skip_threshold: 7.5,

            embedding_weight: 0.50,
            rules_weight: 0.50,

            min_confidence: 0.15,
            disagreement_limit: 0.35,
            borderline_band: 0.08,
            high_confidence_reduction: 0.03,
            low_confidence_increase: 0.08,
            max_threshold_adjustment: 0.10,
            borderline_importance_override: 2.0,

            promotional_penalty: 0.5,
            max_content_analysis_len: 5000,

            temporal_window_days: 30,
            temporal_min_observations: 10,
            temporal_regularity_threshold: 0.5,

            context_cache_ttl_secs: 24 * 60 * 60,
            context_cache_capacity: 100,
            max_thread_messages: 10,

            whitelist: Vec::new(),
            critical_keywords: default_critical_keywords(),
            critical_senders: default_critical_senders(),
            promotional_senders: default_promotional_senders(),
            promotional_subjects: default_promotional_subjects(),
            promotional_patterns: default_promotional_patterns(),
            transactional_patterns: default_transactional_patterns(),
            protected_services: default_protected_services(),
            response_patterns: vec_of(&["re:", "fwd:", "tr:", "fw:"]),
            no_reply_patterns: vec_of(&[
                "noreply",
                "no-reply",
                "donotreply",
                "do-not-reply",
                "no.reply",
            ]),
        }
    }
}

fn vec_of(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_critical_keywords() -> Vec<String> {
    vec_of(&[
        // Security and sign-in alerts
        "security alert",
        "alerte sécurité",
        "sign-in",
        "login",
        "connexion",
        "new device",
        "suspicious",
        "security",
        "sécurité",
        "verify account",
        "verification code",
        "two-factor",
        "2fa",
        "breach",
        "compromised",
        "unauthorized",
        "unusual activity",
        "account locked",
        "password reset",
        "votre code",
        // Financial
        "payment",
        "paiement",
        "transaction",
        "facture",
        "invoice",
        "bank",
        "banque",
        "refund",
        "remboursement",
        "overdue",
        "balance",
        "statement",
        "wire transfer",
        "credit card",
        "carte bancaire",
        "fraudulent",
        // Professional
        "urgent",
        "action required",
        "action nécessaire",
        "deadline",
        "échéance",
        "meeting",
        "réunion",
        "project",
        "projet",
        "follow-up",
        "reminder",
        "invitation",
        "interview",
        "entretien",
        "contract",
        "contrat",
        "signature",
        // Health
        "medical",
        "appointment",
        "rendez-vous",
        "prescription",
        "ordonnance",
        "test results",
        "résultats",
        "diagnosis",
        "treatment",
        "emergency",
        "urgence",
        "shared documents",
        "documents partagés",
        // System and service notifications
        "system alert",
        "login attempt",
        "blocked",
        "update required",
        "security update",
        "account verification",
        "suspension",
        "service interruption",
        "maintenance",
        "critical update",
        "expiring",
        "action needed",
        "confirmation",
        // Administrative and legal
        "subscription",
        "renewal",
        "delivery",
        "livraison",
        "tracking",
        "order",
        "commande",
        "complaint",
        "warranty",
        "cancellation",
        "important notice",
        "policy update",
        "terms of service",
        "privacy",
        "tax document",
        "salary",
        "payslip",
        "legal notice",
        "court",
        "rent",
        "loyer",
        "employment",
        "job offer",
        // Transactional
        "order confirmation",
        "shipping",
        "expédition",
        "delivered",
        "livré",
        "support ticket",
        "case number",
        "reference number",
        "activation",
        "billing",
        "payment method",
        "card expiry",
        "verification required",
    ])
}

fn default_critical_senders() -> Vec<String> {
    vec_of(&[
        // Financial and banking
        "bank",
        "banque",
        "paypal",
        "visa",
        "mastercard",
        "payment",
        "invoice",
        "billing",
        "tax",
        "impôt",
        "finance",
        "credit",
        "loan",
        "mortgage",
        "insurance",
        "assurance",
        // Security and identity
        "security",
        "sécurité",
        "authentication",
        "verify",
        "verification",
        "identity",
        "password",
        "recovery",
        "account",
        "compte",
        "protection",
        "alert",
        "alerte",
        "warning",
        "fraud",
        "fraude",
        // Administrative and essential services
        "admin",
        "helpdesk",
        "official",
        "gouvernement",
        "healthcare",
        "medical",
        "legal",
        "impots.gouv",
        "ameli",
        "caf",
        "pole-emploi",
        "prefecture",
        "administration",
        "authority",
        "ministry",
        "embassy",
        "court",
        "tribunal",
        // Alerts and HR
        "critical-alert",
        "action-required",
        "urgent",
        "recruiter",
        "payroll",
        "university",
        "school",
        "career",
        "job",
        "emploi",
        "interview",
        "application",
        "training",
        // Essential providers
        "electric",
        "internet",
        "telecom",
        "provider",
        "utility",
        "service",
        "support",
        "assistance",
        "emergency",
        "housing",
        "property",
        // Health services
        "health",
        "santé",
        "hospital",
        "hôpital",
        "clinic",
        "doctor",
        "médecin",
        "patient",
        "mutuelle",
        "pharmacy",
        "pharmacie",
        "doctolib",
        "blood test",
    ])
}

fn default_promotional_senders() -> Vec<String> {
    vec_of(&[
        // Marketing communication
        "newsletter",
        "ne-pas-repondre",
        "no-reply",
        "noreply",
        "donotreply",
        "do-not-reply",
        "marketing",
        "promotion",
        "promo",
        "offres",
        "offers",
        "deals",
        "soldes",
        "sales",
        "commercial",
        "publicite",
        "advertisement",
        "actualites",
        "diffusion",
        "campaign",
        "campagne",
        "discover",
        "marketplace",
        "e-mail-marketing",
        // E-commerce
        "shop",
        "boutique",
        "store",
        "e-commerce",
        "retail",
        "vente-privee",
        "shopping",
        // Marketing customer relations
        "info-promo",
        "info-newsletter",
        "welcome",
        "hello",
        "bonjour",
        "client-care",
        "satisfaction",
        "feedback",
        "community",
        "ambassador",
        "influencer",
        // Social networks
        "notifications",
        "follow",
        "subscriber",
        "notification",
        "facebook",
        "instagram",
        "twitter",
        "linkedin",
        "pinterest",
        "tiktok",
        "youtube",
        "twitch",
        "reddit",
        "discord",
        // Subscriptions and loyalty
        "abonnement",
        "subscription",
        "inscription",
        "signup",
        "unsubscribe",
        "désabonnement",
        "opt-out",
        "free-trial",
        "premium",
        "upgrade",
        "subscribe",
        "fidelite",
        "loyalty",
        "member",
        "membre",
        "vip",
        "rewards",
        "recompense",
        "points",
        "bonus",
        "cadeau",
        "gift",
        "birthday",
        "exclusive",
        "club",
        // Events and entertainment
        "event",
        "événement",
        "tickets",
        "billets",
        "concert",
        "cinema",
        "festival",
        "exhibition",
        "entertainment",
        "game",
    ])
}

fn default_promotional_subjects() -> Vec<String> {
    vec_of(&[
        // Offers
        "offre",
        "offer",
        "promo",
        "promotion",
        "solde",
        "sale",
        "remise",
        "discount",
        "reduction",
        "deal",
        "gratuit",
        "free",
        "cadeau",
        "gift",
        "économisez",
        "save",
        "coupon",
        "code promo",
        "% off",
        "clearance",
        "pas cher",
        "achetez",
        "buy",
        "black friday",
        "cyber monday",
        "flash sale",
        "vente flash",
        "outlet",
        "liquidation",
        // Manufactured urgency
        "dernière chance",
        "last chance",
        "ne manquez pas",
        "don't miss",
        "limité",
        "limited",
        "jusqu'à",
        "up to",
        "aujourd'hui",
        "today",
        "last day",
        "ending soon",
        "don't wait",
        "final sale",
        "countdown",
        // Incentives
        "nouveau",
        "new",
        "découvrez",
        "discover",
        "profitez",
        "enjoy",
        "exclusif",
        "exclusive",
        "spécial",
        "special",
        "seulement",
        "only",
        "best",
        "opportunity",
        "must-have",
        "amazing",
        "trending",
        "popular",
        // Benefits
        "livraison gratuite",
        "free shipping",
        "money back",
        "gagnez",
        "win",
        "concours",
        "contest",
        "premium",
        "free trial",
        "essai gratuit",
        "sample",
        "bundle",
        "pack",
        "combo",
        // Marketing relations
        "bienvenue",
        "welcome",
        "fidélité",
        "loyalty",
        "anniversaire",
        "birthday",
        "refer",
        "parrainage",
        "referral",
        "newsletter",
        "désabonner",
        "unsubscribe",
        "member",
        "club",
        "join",
        "rejoignez",
        "we miss you",
        // Seasonal campaigns
        "summer sale",
        "boxing day",
        "christmas",
        "noël",
        "halloween",
        "valentines",
        "mother's day",
        "father's day",
        "holiday",
        "back to school",
        "rentrée",
        "prime day",
    ])
}

fn default_promotional_patterns() -> Vec<String> {
    vec_of(&[
        // Typical promotional phrasing
        r"[0-9]{1,2}\s*%\s*(de\s*remise|off|discount)",
        r"(free|gratuit)\s*(shipping|delivery|livraison)",
        r"(don.?t|ne)\s*(miss|manquez)",
        r"(limited|limité)\s*(time|temps|offer|offre)",
        r"(new\s*arrivals|nouveautés)",
        r"(promo|promotion|deal|offer|offre|discount|remise|solde)s?",
        // Artificial urgency
        r"(last\s*chance|dernière\s*chance)",
        r"(sale\s*ends|fin\s*des\s*soldes)",
        r"(only|seulement)\s*[0-9]+\s*(days|jours)",
        r"(today\s*only|aujourd.hui\s*seulement)",
        r"(expires?|expire)\s*(today|soon|bientôt)",
        // Calls to action
        r"(shop|achetez)\s*(now|maintenant)",
        r"(learn|découvrez)\s*(more|plus)",
        r"(sign\s*up|inscrivez[\s-]vous)",
        r"(buy|order|commandez)\s*(now|maintenant)",
        r"(click|cliquez)\s*(here|ici)",
        r"(subscribe|abonnez[\s-]vous)",
        r"(try|essayez)\s*(it|le)\s*(now|today|maintenant)",
        // Commercial formulas
        r"(satisfaction\s*guaranteed|satisfaction\s*garantie)",
        r"(money\s*back|remboursé)",
        r"(no\s*obligation|sans\s*engagement)",
        r"(unsubscribe|désabonner|désinscri)",
        r"(view\s*in\s*browser|voir\s*dans\s*navigateur)",
    ])
}

fn default_transactional_patterns() -> Vec<String> {
    vec_of(&[
        // Confirmations and receipts
        r"(confirmation|confirmed|receipt|reçu|facture|invoice)",
        r"(order|commande)\s*(#|n[o°]|:)\s*[a-z0-9]+",
        r"(payment|paiement)\s*(received|reçu|confirmed|confirmé)",
        r"(shipping|livraison|delivery|expédition)",
        r"(tracking|suivi)\s*(number|numéro|#)",
        r"(reservation|booking|réservation)",
        r"(appointment|rendez-vous)\s*(confirmed|confirmé)",
        r"(subscription|abonnement)\s*(activated|activé|renewed|renouvelé)",
        // Medical documents
        r"documents?\s*(partagés?|shared|médicaux?|medical)",
        r"résultats?\s*(d.analyse|de\s*test|medical)",
        // Security alerts
        r"(security|sécurité)\s*(alert|alerte)",
        r"(login|connexion)\s*(attempt|tentative)",
        r"(password|mot\s*de\s*passe)\s*(reset|réinitialisation)",
        r"(account|compte)\s*(verification|vérification)",
        // Banking
        r"(statement|relevé)\s*(available|disponible)",
        r"(transaction|virement)\s*(completed|effectué)",
        r"(card|carte)\s*(blocked|bloquée|expired|expirée)",
        r"(balance|solde)\s*(alert|alerte|notification)",
    ])
}

fn default_protected_services() -> Vec<String> {
    vec_of(&[
        // Medical
        "doctolib",
        "ameli",
        "cpam",
        "mutuelle",
        "laboratoire",
        "hopital",
        "clinique",
        // Banking
        "banque",
        "bank",
        "credit-agricole",
        "bnp",
        "societe-generale",
        "boursobank",
        "revolut",
        "n26",
        "paypal",
        "stripe",
        "wise",
        // Government
        "gouv.fr",
        "service-public",
        "impots.gouv",
        "pole-emploi",
        "caf",
        "prefecture",
        // Security
        "security",
        "account",
        "verification",
        "authentication",
        "2fa",
        // Essential platforms
        "google",
        "microsoft",
        "apple",
        "amazon",
        "github",
        "gitlab",
    ])
}
