//! Thread context analysis.
//!
//! A message that is part of an active multi-party conversation is almost
//! never promotional, whatever its body looks like. The analyzer pulls the
//! thread through a `ThreadSource`, scores participation, and caches the
//! verdict per thread with a TTL and a hard capacity bound so repeated
//! messages in the same thread stay cheap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::JsonStore;
use crate::config::TriageConfig;
use crate::error::{CacheError, Result};

/// Context score at which a thread counts as important.
const IMPORTANT_THREAD_SCORE: f64 = 3.0;

/// One message of a thread, as much as context scoring needs.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub sender: String,
}

/// Source of thread history. The engine core stays independent of any
/// particular mail provider behind this seam.
pub trait ThreadSource {
    /// Messages of a thread in delivery order, at most `limit` of them.
    fn thread_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<ThreadMessage>>;
}

/// Cached context verdict for one thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedContext {
    score: f64,
    is_important: bool,
    participants: usize,
    messages: usize,
    cached_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextState {
    threads: HashMap<String, CachedContext>,
}

/// Context verdict returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ContextVerdict {
    pub score: f64,
    pub is_important: bool,
    /// Distinct participants other than the user.
    pub participants: usize,
    pub messages: usize,
    pub from_cache: bool,
}

/// Scores thread participation, with a persistent TTL cache.
pub struct ContextAnalyzer {
    config: Arc<TriageConfig>,
    store: JsonStore,
    state: Mutex<ContextState>,
}

impl ContextAnalyzer {
    /// Open the analyzer, restoring any persisted cache.
    pub fn open(config: Arc<TriageConfig>, store: JsonStore) -> Self {
        let state = store.load_or_default();
        Self {
            config,
            store,
            state: Mutex::new(state),
        }
    }

    /// Analyze a thread, serving from cache when a fresh entry exists.
    pub fn analyze(
        &self,
        thread_id: &str,
        user_email: &str,
        source: &dyn ThreadSource,
        now: DateTime<Utc>,
    ) -> Result<ContextVerdict> {
        let ttl = Duration::seconds(self.config.context_cache_ttl_secs as i64);

        {
            let mut state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
            if let Some(cached) = state.threads.get_mut(thread_id)
                && now - cached.cached_at < ttl
            {
                cached.last_accessed = now;
                debug!(thread_id, score = cached.score, "Thread context served from cache");
                return Ok(ContextVerdict {
                    score: cached.score,
                    is_important: cached.is_important,
                    participants: cached.participants,
                    messages: cached.messages,
                    from_cache: true,
                });
            }
        }

        let messages = source.thread_messages(thread_id, self.config.max_thread_messages)?;
        let verdict = score_thread(&messages, user_email);

        let mut state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
        state.threads.insert(
            thread_id.to_string(),
            CachedContext {
                score: verdict.score,
                is_important: verdict.is_important,
                participants: verdict.participants,
                messages: verdict.messages,
                cached_at: now,
                last_accessed: now,
            },
        );
        evict(&mut state.threads, self.config.context_cache_capacity);

        debug!(
            thread_id,
            score = verdict.score,
            participants = verdict.participants,
            messages = verdict.messages,
            is_important = verdict.is_important,
            "Thread context analyzed"
        );
        Ok(verdict)
    }

    /// Number of cached thread verdicts.
    pub fn cached_threads(&self) -> usize {
        self.state.lock().map(|s| s.threads.len()).unwrap_or(0)
    }

    /// Write the current cache to the backing store.
    pub fn persist(&self) -> Result<()> {
        let state = self.state.lock().map_err(|_| CacheError::Poisoned)?;
        self.store.store(&*state)
    }
}

/// Participation score: multiple non-user participants, thread length and
/// whether the user started the conversation.
fn score_thread(messages: &[ThreadMessage], user_email: &str) -> ContextVerdict {
    let user = user_email.to_lowercase();
    let mut participants = std::collections::HashSet::new();
    for message in messages {
        let sender = message.sender.to_lowercase();
        if !sender.contains(&user) {
            participants.insert(sender);
        }
    }

    let mut score = 0.0;
    if participants.len() >= 3 {
        score += (participants.len() as f64 * 0.8).min(3.0);
    }
    if messages.len() >= 3 {
        score += (messages.len() as f64 * 0.5).min(2.5);
    }
    let user_initiated = messages
        .first()
        .is_some_and(|m| m.sender.to_lowercase().contains(&user));
    if user_initiated {
        score += 1.5;
    }

    ContextVerdict {
        score,
        is_important: score >= IMPORTANT_THREAD_SCORE,
        participants: participants.len(),
        messages: messages.len(),
        from_cache: false,
    }
}

/// Drop oldest-accessed entries above capacity.
fn evict(threads: &mut HashMap<String, CachedContext>, capacity: usize) {
    if threads.len() <= capacity {
        return;
    }
    let mut by_access: Vec<(String, DateTime<Utc>)> = threads
        .iter()
        .map(|(id, c)| (id.clone(), c.last_accessed))
        .collect();
    by_access.sort_by_key(|(_, accessed)| *accessed);
    let excess = threads.len() - capacity;
    for (id, _) in by_access.into_iter().take(excess) {
        threads.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeThreads {
        messages: Vec<ThreadMessage>,
        fetches: AtomicUsize,
    }

    impl FakeThreads {
        fn new(senders: &[&str]) -> Self {
            Self {
                messages: senders
                    .iter()
                    .map(|s| ThreadMessage {
                        sender: s.to_string(),
                    })
                    .collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    impl ThreadSource for FakeThreads {
        fn thread_messages(&self, _thread_id: &str, limit: usize) -> Result<Vec<ThreadMessage>> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            Ok(self.messages.iter().take(limit).cloned().collect())
        }
    }

    fn analyzer(dir: &std::path::Path, config: TriageConfig) -> ContextAnalyzer {
        ContextAnalyzer::open(Arc::new(config), JsonStore::new(dir.join("context.json")))
    }

    #[test]
    fn active_group_thread_is_important() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), TriageConfig::default());
        let source = FakeThreads::new(&[
            "me@example.com",
            "alice@example.com",
            "bob@example.com",
            "carol@example.com",
            "alice@example.com",
        ]);

        let verdict = analyzer
            .analyze("thread-1", "me@example.com", &source, Utc::now())
            .unwrap();
        // 3 participants (2.4) + 5 messages (2.5) + user initiated (1.5).
        assert!((verdict.score - 6.4).abs() < 1e-9);
        assert!(verdict.is_important);
        assert_eq!(verdict.participants, 3);
    }

    #[test]
    fn single_sender_blast_thread_is_not_important() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), TriageConfig::default());
        let source = FakeThreads::new(&["newsletter@shop.example"]);

        let verdict = analyzer
            .analyze("thread-2", "me@example.com", &source, Utc::now())
            .unwrap();
        assert_eq!(verdict.score, 0.0);
        assert!(!verdict.is_important);
    }

    #[test]
    fn verdicts_are_cached_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), TriageConfig::default());
        let source = FakeThreads::new(&["me@example.com", "alice@example.com", "bob@example.com"]);
        let now = Utc::now();

        let first = analyzer
            .analyze("thread-3", "me@example.com", &source, now)
            .unwrap();
        let second = analyzer
            .analyze("thread-3", "me@example.com", &source, now + Duration::hours(1))
            .unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.score, second.score);
        assert_eq!(source.fetches.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn expired_entries_are_reanalyzed() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), TriageConfig::default());
        let source = FakeThreads::new(&["alice@example.com"]);
        let now = Utc::now();

        analyzer
            .analyze("thread-4", "me@example.com", &source, now)
            .unwrap();
        let later = analyzer
            .analyze("thread-4", "me@example.com", &source, now + Duration::hours(25))
            .unwrap();

        assert!(!later.from_cache);
        assert_eq!(source.fetches.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn cache_capacity_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let config = TriageConfig {
            context_cache_capacity: 5,
            ..TriageConfig::default()
        };
        let analyzer = analyzer(dir.path(), config);
        let source = FakeThreads::new(&["alice@example.com"]);
        let now = Utc::now();

        for i in 0..12 {
            analyzer
                .analyze(
                    &format!("thread-{i}"),
                    "me@example.com",
                    &source,
                    now + Duration::seconds(i as i64),
                )
                .unwrap();
        }
        assert!(analyzer.cached_threads() <= 5);
    }

    #[test]
    fn cache_round_trips_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeThreads::new(&["me@example.com", "alice@example.com", "bob@example.com"]);
        let now = Utc::now();
        {
            let analyzer = analyzer(dir.path(), TriageConfig::default());
            analyzer
                .analyze("thread-5", "me@example.com", &source, now)
                .unwrap();
            analyzer.persist().unwrap();
        }

        let reopened = analyzer(dir.path(), TriageConfig::default());
        let verdict = reopened
            .analyze("thread-5", "me@example.com", &source, now + Duration::hours(1))
            .unwrap();
        assert!(verdict.from_cache);
        assert_eq!(source.fetches.load(Ordering::Relaxed), 1);
    }
}
