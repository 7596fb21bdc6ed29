use promptmin_chunking::{chunk_document, Chunker, Granularity};
use promptmin_core::{join_chunks, PreserveSelector};
use proptest::prelude::*;

const FIXTURES: &[&str] = &[
    "",
    "\n",
    "no trailing newline",
    "# Title\r\nWindows line endings.\r\n\r\n- item\r\n",
    "   \n\t\n",
    "```python\n# comment, not a heading\nprint('x')\n",
    "~~~~\ncode\n~~~\nstill code\n~~~~\n\nafter\n",
    "Emoji 🚀 first. Then ünïcödé? Yes!\n",
    "system: |\n  You are a bot.\nuser: hi\n",
    "<!-- keep -->\n# A\n\n1. one\n2. two\n\n## B\nSentence one.Sentence two. Three!\n",
];

#[test]
fn fixtures_reconstruct_at_every_granularity() {
    let chunker = Chunker::new(&[PreserveSelector::Regex {
        pattern: "(?i)code".to_string(),
    }])
    .expect("chunker");
    for doc in FIXTURES {
        for granularity in Granularity::ALL {
            let chunks = chunker.chunk(doc, granularity);
            assert_eq!(&join_chunks(&chunks), doc, "{granularity}: {doc:?}");
            assert!(chunks.iter().all(|chunk| !chunk.text.is_empty()));
        }
    }
}

#[test]
fn chunk_ids_are_unique_and_stable() {
    for doc in FIXTURES {
        for granularity in Granularity::ALL {
            let first = chunk_document(doc, granularity);
            let second = chunk_document(doc, granularity);
            assert_eq!(first, second);
            let mut ids = first.iter().map(|chunk| chunk.id.clone()).collect::<Vec<_>>();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), first.len());
        }
    }
}

#[test]
fn finer_levels_produce_at_least_as_many_chunks() {
    let doc = FIXTURES[9];
    let counts = Granularity::ALL
        .iter()
        .map(|granularity| chunk_document(doc, *granularity).len())
        .collect::<Vec<_>>();
    assert!(counts[0] <= counts[1], "{counts:?}");
    assert!(counts[1] <= counts[2], "{counts:?}");
}

fn markdown_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("\n".to_string()),
        Just("```\n".to_string()),
        Just("~~~\n".to_string()),
        Just("<!-- keep -->\n".to_string()),
        "[a-z ]{0,12}\n".prop_map(|line| format!("# {line}")),
        "[a-z ]{0,12}\n".prop_map(|line| format!("- {line}")),
        "[a-zA-Z .!?\"')]{0,30}\r?\n?".prop_map(String::from),
        "\\PC{0,16}".prop_map(String::from),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arbitrary_documents_reconstruct(lines in prop::collection::vec(markdown_line(), 0..24)) {
        let doc = lines.concat();
        for granularity in Granularity::ALL {
            let chunks = chunk_document(&doc, granularity);
            prop_assert_eq!(join_chunks(&chunks), doc.clone());
            prop_assert!(chunks.iter().all(|chunk| !chunk.text.is_empty()));
        }
    }

    #[test]
    fn arbitrary_text_reconstructs(doc in "\\PC*") {
        for granularity in Granularity::ALL {
            let chunks = chunk_document(&doc, granularity);
            prop_assert_eq!(join_chunks(&chunks), doc.clone());
        }
    }
}
