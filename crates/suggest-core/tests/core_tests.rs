use suggest_core::types::{item_id, keys, merge, DEFAULT_ROLE};
use suggest_core::{Kind, SuggestError, SuggestItem};

fn item(words: &[&str], kind: Kind) -> SuggestItem {
    let readings = words.iter().map(|w| vec![w.to_string()]).collect();
    SuggestItem::new(words, readings, kind)
}

#[test]
fn id_is_a_pure_function_of_text_and_word_order_matters() {
    assert_eq!(item_id("検索 エンジン"), item_id("検索 エンジン"));
    assert_ne!(item_id("検索 エンジン"), item_id("エンジン 検索"));
    assert_ne!(item_id("a"), item_id("b"));
    let a = item(&["全文", "検索"], Kind::Document);
    let b = item(&["全文", "検索"], Kind::Query);
    assert_eq!(a.id(), b.id());
    assert_eq!(a.id(), item_id("全文 検索"));
}

#[test]
fn merge_sums_counters_and_unions_sets() {
    let a = item(&["rust"], Kind::Document).with_doc_freq(2).with_tags(["t1"]).with_user_boost(3.0);
    let b = SuggestItem::new(&["rust"], vec![vec!["ラスト".to_string()]], Kind::Query)
        .with_query_freq(1)
        .with_tags(["t2", "t1"])
        .with_roles(["admin"]);
    let m = merge(&a, &b).expect("same id");
    assert_eq!(m.doc_freq(), 2);
    assert_eq!(m.query_freq(), 1);
    assert_eq!(m.user_boost(), 1.0, "boost takes the second operand's value");
    assert_eq!(m.tags().collect::<Vec<_>>(), vec!["t1", "t2"]);
    assert_eq!(m.kinds().collect::<Vec<_>>(), vec![Kind::Document, Kind::Query]);
    assert_eq!(m.roles().collect::<Vec<_>>(), vec![DEFAULT_ROLE, "admin"]);
    assert_eq!(m.readings()[0], vec!["rust".to_string(), "ラスト".to_string()]);
}

#[test]
fn merge_is_associative_for_counters_and_sets() {
    let a = item(&["x", "y"], Kind::Document).with_doc_freq(1).with_tags(["a"]);
    let b = item(&["x", "y"], Kind::Query).with_query_freq(4).with_languages(["ja"]);
    let c = item(&["x", "y"], Kind::User).with_doc_freq(7).with_tags(["c", "a"]);

    let left = merge(&merge(&a, &b).unwrap(), &c).unwrap();
    let right = merge(&a, &merge(&b, &c).unwrap()).unwrap();

    assert_eq!(left.doc_freq(), right.doc_freq());
    assert_eq!(left.query_freq(), right.query_freq());
    assert_eq!(left.tags().collect::<Vec<_>>(), right.tags().collect::<Vec<_>>());
    assert_eq!(left.languages().collect::<Vec<_>>(), right.languages().collect::<Vec<_>>());
    assert_eq!(left.kinds().collect::<Vec<_>>(), right.kinds().collect::<Vec<_>>());
    assert_eq!(left.readings(), right.readings());
}

#[test]
fn merging_different_ids_is_an_error() {
    let a = item(&["one"], Kind::Document);
    let b = item(&["two"], Kind::Document);
    match merge(&a, &b) {
        Err(SuggestError::IdentityMismatch { left, right }) => {
            assert_eq!(left, a.id());
            assert_eq!(right, b.id());
        }
        other => panic!("expected identity mismatch, got {other:?}"),
    }
}

#[test]
fn boost_never_drops_below_one() {
    for boost in [0.0, -1.0, 0.25, f32::MIN, f32::MAX, 1.5] {
        let it = item(&["w"], Kind::User).with_user_boost(boost);
        assert!(it.user_boost() >= 1.0, "boost {boost} became {}", it.user_boost());
        let merged = merge(&item(&["w"], Kind::User), &it).unwrap();
        assert!(merged.user_boost() >= 1.0);
    }
}

#[test]
fn repeated_merge_keeps_resetting_boost() {
    let base = item(&["w"], Kind::User).with_user_boost(10.0);
    let boosted = item(&["w"], Kind::User).with_user_boost(2.0);
    let once = merge(&base, &boosted).unwrap();
    let twice = merge(&once, &boosted).unwrap();
    assert_eq!(once.user_boost(), 2.0);
    assert_eq!(twice.user_boost(), 2.0);
    assert_eq!(twice.kinds().count(), 1);
}

#[test]
fn score_is_frequency_times_boost() {
    let it = item(&["w"], Kind::Document).with_doc_freq(3).with_query_freq(2).with_user_boost(1.5);
    assert!((it.score() - 7.5).abs() < 1e-9);
}

#[test]
fn record_round_trip_keeps_text_frequencies_and_readings() {
    let words = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l"];
    let readings: Vec<Vec<String>> = words.iter().map(|w| vec![w.to_uppercase(), format!("{w}{w}")]).collect();
    let original = SuggestItem::new(&words, readings, Kind::Document)
        .with_doc_freq(5)
        .with_query_freq(6)
        .with_user_boost(2.0)
        .with_fields(["content"])
        .with_kinds([Kind::Document, Kind::Query])
        .with_timestamp(1234);

    let record = original.to_record();
    assert!(record.contains_key(&keys::reading(11)), "reading fields follow word count");
    let parsed = SuggestItem::parse_record(&record).expect("parse");
    assert_eq!(parsed, original);
}

#[test]
fn parse_record_rejects_unknown_kind() {
    let mut record = item(&["w"], Kind::Document).to_record();
    record.insert(keys::KINDS.into(), serde_json::json!(["robot"]));
    assert!(SuggestItem::parse_record(&record).is_err());
}

#[test]
fn bad_word_is_a_case_sensitive_substring_match() {
    let it = item(&["検索", "エンジン"], Kind::Document);
    assert!(it.is_bad_word(&["エンジ"]));
    assert!(!it.is_bad_word(&["ｴﾝｼﾞﾝ"]));
    let latin = item(&["Rust"], Kind::Document);
    assert!(!latin.is_bad_word(&["rust"]));
    assert!(!latin.is_bad_word(&[""]));
}
