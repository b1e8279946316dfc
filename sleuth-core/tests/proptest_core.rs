//! Property-based tests for core components using proptest.

use indexmap::IndexMap;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use sleuth_core::cache::{ResultCache, cache_key, normalize_query};
use sleuth_core::clock::ManualClock;
use sleuth_core::config::LedgerConfig;
use sleuth_core::ledger::{ReliabilityTable, SourceMetadata, quality_score};
use sleuth_core::{
    CachedResult, ClarificationEngine, SourceLedger, ToolCall, ToolPerformance, order_queries,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

// --- Cache properties ---

proptest! {
    #[test]
    fn cache_entry_visible_until_ttl_elapses(
        query in "[a-z]{1,12}",
        value in any::<i64>(),
        ttl_secs in 1i64..10_000,
        before in 0i64..10_000,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::default());
            let cache = ResultCache::with_clock(1024 * 1024, 100, clock.clone());
            let key = cache_key("web_search", &query);
            let stored = CachedResult {
                payload: serde_json::json!(value),
                source_urls: BTreeSet::new(),
            };
            cache.put(key.clone(), stored.clone(), Duration::from_secs(ttl_secs as u64)).await;

            let elapsed = before % ttl_secs;
            clock.advance(chrono::Duration::seconds(elapsed));
            prop_assert_eq!(cache.get(&key).await, Some(stored));

            clock.advance(chrono::Duration::seconds(ttl_secs - elapsed));
            prop_assert_eq!(cache.get(&key).await, None);
            Ok(())
        })?;
    }

    #[test]
    fn cache_key_ignores_case_and_spacing(
        tool in "[a-z_]{1,12}",
        words in prop::collection::vec("[a-z0-9]{1,8}", 1..6),
        pad in "[ \t]{0,3}",
    ) {
        let query = words.join(" ");
        let noisy = format!("{pad}{}{pad}", words.join("   ").to_uppercase());
        prop_assert_eq!(cache_key(&tool, &query), cache_key(&tool.to_uppercase(), &noisy));
    }

    #[test]
    fn normalize_query_is_idempotent(query in "[a-zA-Z0-9 \\t]{0,40}") {
        let once = normalize_query(&query);
        prop_assert_eq!(normalize_query(&once), once);
    }
}

// --- Ledger properties ---

proptest! {
    #[test]
    fn quality_never_decreases_with_observations(
        host in "[a-z]{1,10}\\.(com|org|edu|io)",
        tool in prop::sample::select(vec!["web_search", "web_fetch", "arxiv_search", "custom"]),
        observations in 2u64..20,
    ) {
        let table = ReliabilityTable::default();
        let url = format!("https://{host}/page");
        let tools: BTreeSet<String> = [tool.to_string()].into_iter().collect();
        let mut previous = quality_score(&table, &url, &tools, 1);
        for n in 2..=observations {
            let current = quality_score(&table, &url, &tools, n);
            prop_assert!(current >= previous);
            prop_assert!((0.0..=1.0).contains(&current));
            previous = current;
        }
    }

    #[test]
    fn recorded_quality_never_decreases(
        host in "[a-z]{1,10}\\.(com|org|edu|io)",
        table_scores in prop::collection::vec(0.0f64..=1.0, 4),
        default_score in 0.0f64..=1.0,
        observations in prop::collection::vec(0usize..6, 1..12),
    ) {
        let mut config = LedgerConfig::default();
        config.reliability.default_score = default_score;
        for (i, score) in table_scores.iter().enumerate() {
            config.reliability.tools.insert(format!("tool{i}"), *score);
        }
        // tool4 and tool5 are absent from the table.
        let url = format!("https://{host}/page");

        let rt = runtime();
        rt.block_on(async {
            let ledger = SourceLedger::from_config(&config, Arc::new(ManualClock::default()));
            let mut previous = 0.0;
            for tool in &observations {
                ledger
                    .record(&url, &format!("tool{tool}"), SourceMetadata::default())
                    .await;
                let current = ledger.quality_of(&url).await;
                prop_assert!(current >= previous, "{current} < {previous} after tool{tool}");
                prop_assert!((0.0..=1.0).contains(&current));
                previous = current;
            }
            Ok(())
        })?;
    }
}

// --- Clarification properties ---

proptest! {
    #[test]
    fn refine_without_responses_is_identity(question in "\\PC{0,60}") {
        let engine = ClarificationEngine::default();
        prop_assert_eq!(engine.refine(&question, &IndexMap::new()), question);
    }

    #[test]
    fn generated_question_count_within_bounds(
        question in "[a-z ]{0,40}",
        max in 0usize..6,
    ) {
        let engine = ClarificationEngine::default();
        let questions = engine.generate_questions(&question, &[], max);
        prop_assert!(!questions.is_empty());
        prop_assert!(questions.len() <= max.max(1));
    }
}

// --- Optimizer properties ---

proptest! {
    #[test]
    fn order_queries_is_a_stable_permutation(
        tools in prop::collection::vec(0usize..6, 0..12),
        stats in prop::collection::vec((1u64..20, 0u64..20, 0u32..1000), 3),
    ) {
        let history: HashMap<String, ToolPerformance> = stats
            .iter()
            .enumerate()
            .map(|(i, (samples, successes, latency))| {
                (
                    format!("tool{i}"),
                    ToolPerformance {
                        samples: *samples,
                        successes: (*successes).min(*samples),
                        avg_latency_ms: *latency as f64,
                    },
                )
            })
            .collect();
        let calls: Vec<ToolCall> = tools
            .iter()
            .enumerate()
            .map(|(i, t)| ToolCall::new(format!("tool{t}"), format!("q{i}")))
            .collect();

        let ordered = order_queries(calls.clone(), &history);
        prop_assert_eq!(ordered.len(), calls.len());

        let mut sorted_in: Vec<_> = calls.iter().map(|c| c.query.clone()).collect();
        let mut sorted_out: Vec<_> = ordered.iter().map(|c| c.query.clone()).collect();
        sorted_in.sort();
        sorted_out.sort();
        prop_assert_eq!(sorted_in, sorted_out);

        // Tools with history come first, by descending success rate.
        let known = ordered.iter().take_while(|c| history.contains_key(&c.tool_name)).count();
        prop_assert!(ordered[known..].iter().all(|c| !history.contains_key(&c.tool_name)));
        for pair in ordered[..known].windows(2) {
            let a = history[&pair[0].tool_name].success_rate();
            let b = history[&pair[1].tool_name].success_rate();
            prop_assert!(a >= b);
        }

        // Unknown tools keep their original relative order.
        let unknown_in: Vec<_> = calls.iter().filter(|c| !history.contains_key(&c.tool_name)).collect();
        let unknown_out: Vec<_> = ordered[known..].iter().collect();
        prop_assert_eq!(unknown_in, unknown_out);

        // Calls for the same tool keep their original relative order.
        let position = |q: &str| calls.iter().position(|c| c.query == q).unwrap_or(usize::MAX);
        for pair in ordered.windows(2) {
            if pair[0].tool_name == pair[1].tool_name {
                prop_assert!(position(&pair[0].query) < position(&pair[1].query));
            }
        }
    }
}
