//! Property tests for chunk windows, exact search and embedding normalization.

mod common;

use proptest::prelude::*;
use virta::index::{l2_norm, normalize};
use virta::{chunker::token_windows, ChunkingConfig, VectorIndex};

const DIM: usize = 8;

fn window_config() -> impl Strategy<Value = ChunkingConfig> {
    (1usize..64).prop_flat_map(|max_tokens| {
        (0..max_tokens).prop_map(move |overlap_tokens| ChunkingConfig {
            max_tokens,
            overlap_tokens,
        })
    })
}

fn unit_vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0, DIM)
        .prop_filter("non-zero", |v| l2_norm(v) > 1e-3)
        .prop_map(|mut v| {
            normalize(&mut v).unwrap();
            v
        })
}

fn corpus_text() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,12}", 1..400).prop_map(|words| words.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn windows_are_bounded_and_cover_every_token(len in 0usize..2_000, config in window_config()) {
        let windows = token_windows(len, &config);
        let mut covered = 0usize;
        for (i, window) in windows.iter().enumerate() {
            prop_assert!(window.start < window.end);
            prop_assert!(window.end - window.start <= config.max_tokens);
            prop_assert_eq!(window.start, i * config.stride());
            // no gap after the previous window
            prop_assert!(window.start <= covered);
            prop_assert!(window.end >= covered);
            covered = window.end;
        }
        prop_assert_eq!(covered, len);
    }

    #[test]
    fn search_is_bounded_and_sorted(
        vectors in prop::collection::vec(unit_vector(), 0..40),
        query in unit_vector(),
        k in 0usize..50,
    ) {
        let mut index = VectorIndex::new(DIM).unwrap();
        index.add(&vectors).unwrap();
        let hits = index.search(&query, k).unwrap();

        prop_assert_eq!(hits.len(), k.min(vectors.len()));
        let in_range = hits.iter().all(|hit| hit.ordinal < vectors.len());
        prop_assert!(in_range);
        let ordered = hits.windows(2).all(|pair| {
            pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].ordinal < pair[1].ordinal)
        });
        prop_assert!(ordered, "hits out of order: {:?}", hits);

        let reloaded = VectorIndex::from_bytes(&index.to_bytes()).unwrap();
        prop_assert_eq!(reloaded.search(&query, k).unwrap(), hits);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn embeddings_are_unit_length(text in corpus_text(), max_chars in 32usize..400) {
        let client = common::hashing_client(max_chars);
        match client.embed(&text) {
            Ok(vector) => {
                prop_assert_eq!(vector.len(), common::DIM);
                prop_assert!((l2_norm(&vector) - 1.0).abs() <= 1e-5);
            }
            // overflow deeper than the recovery budget
            Err(err) => {
                let exhausted = matches!(err, virta::EmbedError::BisectionExhausted { .. });
                prop_assert!(exhausted, "unexpected error: {}", err);
            }
        }
    }
}
