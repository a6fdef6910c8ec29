use simcheck_core::compare::compare;
use simcheck_core::config::Config;
use simcheck_core::engine::{CheckRequest, Engine, UploadRequest};
use simcheck_core::expiry::DEFAULT_DRAFT_TTL;
use simcheck_core::fingerprint::Fingerprinter;
use simcheck_core::store::{CorpusStore, FileStore, MemoryStore, QueryFilter};
use simcheck_core::{DocumentStatus, Error};
use tempfile::tempdir;

const ESSAY: &str = "Memory safety without garbage collection is achieved through ownership, \
borrowing and lifetimes, which the compiler checks statically before any code runs. \
This essay examines how those rules interact with concurrency and why data races \
become compile time errors rather than production incidents.";

const OTHER: &str = "Photosynthesis converts light energy into chemical energy stored in glucose. \
Chlorophyll molecules absorb red and blue wavelengths while reflecting green light, \
and the Calvin cycle fixes atmospheric carbon into sugars inside the stroma.";

fn upload(title: &str, content: &str, category: &str) -> UploadRequest {
    UploadRequest {
        title: title.into(),
        author: Some("A. Student".into()),
        category: Some(category.into()),
        status: DocumentStatus::Final,
        user_id: Some("student".into()),
        institution: Some("BSUIR".into()),
        original_filename: format!("{title}.docx"),
        file_bytes: content.as_bytes().to_vec(),
        content: content.into(),
    }
}

fn check(content: &str, category: Option<&str>) -> CheckRequest {
    CheckRequest { content: content.into(), category: category.map(str::to_owned), ..Default::default() }
}

#[test]
fn empty_corpus_is_fully_unique() {
    let engine = Engine::new(MemoryStore::default(), &Config::default());
    let outcome = engine.check(&check(ESSAY, Some("diploma"))).unwrap();
    assert_eq!(outcome.uniqueness_percent, 100);
    assert_eq!(outcome.checked_count, 0);
    assert!(outcome.matches.is_empty());
}

#[test]
fn uploaded_text_matches_itself() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path(), DEFAULT_DRAFT_TTL).unwrap();
    let engine = Engine::new(store, &Config::default());
    let doc = engine.upload(upload("essay", ESSAY, "diploma")).unwrap();
    engine.upload(upload("bio", OTHER, "diploma")).unwrap();

    let outcome = engine.check(&check(ESSAY, Some("diploma"))).unwrap();
    assert_eq!(outcome.checked_count, 2);
    assert_eq!(outcome.matches[0].id, doc.id);
    assert_eq!(outcome.matches[0].similarity, 100);
    assert_eq!(outcome.uniqueness_percent, 0);
    assert!(outcome.matches[1].similarity < 15);
}

#[test]
fn coursework_check_sees_diploma_corpus() {
    let engine = Engine::new(MemoryStore::default(), &Config::default());
    engine.upload(upload("essay", ESSAY, "diploma")).unwrap();

    let cross = engine.check(&check(ESSAY, Some("coursework"))).unwrap();
    assert_eq!(cross.checked_count, 1);
    assert_eq!(cross.uniqueness_percent, 0);

    let lab = engine.check(&check(ESSAY, Some("lab"))).unwrap();
    assert_eq!(lab.checked_count, 0);
    assert_eq!(lab.uniqueness_percent, 100);

    let all = engine.check(&check(ESSAY, Some("all"))).unwrap();
    assert_eq!(all.checked_count, 1);
    let unspecified = engine.check(&check(ESSAY, None)).unwrap();
    assert_eq!(unspecified.checked_count, 1);
}

#[test]
fn partial_overlap_scores_in_between() {
    let engine = Engine::new(MemoryStore::default(), &Config::default());
    engine.upload(upload("essay", ESSAY, "lab")).unwrap();
    let mixed = format!("{ESSAY} {OTHER}");
    let outcome = engine.check(&check(&mixed, Some("lab"))).unwrap();
    let sim = outcome.matches[0].similarity;
    assert!(sim > 20 && sim < 80, "similarity {sim}");
    assert_eq!(outcome.uniqueness_percent, 100 - sim);
}

#[test]
fn short_content_is_rejected() {
    let engine = Engine::new(MemoryStore::default(), &Config::default());
    let err = engine.check(&check("too short", None)).unwrap_err();
    assert!(matches!(err, Error::InputRejected(_)));
}

#[test]
fn top_k_limits_matches() {
    let engine = Engine::new(MemoryStore::default(), &Config::default());
    for i in 0..4 {
        engine.upload(upload(&format!("essay{i}"), ESSAY, "lab")).unwrap();
    }
    let mut req = check(ESSAY, Some("lab"));
    req.top_k = Some(2);
    let outcome = engine.check(&req).unwrap();
    assert_eq!(outcome.checked_count, 4);
    assert_eq!(outcome.matches.len(), 2);
    // Ties keep most recent first.
    assert_eq!(outcome.matches[0].title, "essay3");
}

#[test]
fn check_filters_by_institution_and_excluded_user() {
    let engine = Engine::new(MemoryStore::default(), &Config::default());
    engine.upload(upload("essay", ESSAY, "lab")).unwrap();

    let mut req = check(ESSAY, Some("lab"));
    req.institution = Some("BSU".into());
    assert_eq!(engine.check(&req).unwrap().checked_count, 0);

    let mut req = check(ESSAY, Some("lab"));
    req.exclude_user_id = Some("student".into());
    assert_eq!(engine.check(&req).unwrap().uniqueness_percent, 100);
}

#[test]
fn check_does_not_persist() {
    let engine = Engine::new(MemoryStore::default(), &Config::default());
    engine.check(&check(ESSAY, Some("lab"))).unwrap();
    assert!(engine.store().query(&QueryFilter::default()).unwrap().is_empty());
}

#[test]
fn upload_requires_title_content_and_file() {
    let engine = Engine::new(MemoryStore::default(), &Config::default());
    let mut no_title = upload("x", ESSAY, "lab");
    no_title.title = "   ".into();
    assert!(matches!(engine.upload(no_title), Err(Error::InputRejected(_))));

    let mut no_content = upload("x", ESSAY, "lab");
    no_content.content = String::new();
    assert!(matches!(engine.upload(no_content), Err(Error::InputRejected(_))));

    let mut no_file = upload("x", ESSAY, "lab");
    no_file.file_bytes.clear();
    assert!(matches!(engine.upload(no_file), Err(Error::InputRejected(_))));
    assert_eq!(engine.store().file_count(), 0);
}

#[test]
fn upload_stores_normalized_content_and_original() {
    let engine = Engine::new(MemoryStore::default(), &Config::default());
    let body = format!("{ESSAY} {ESSAY} {ESSAY} {OTHER}");
    let raw = format!("{body} ПРИЛОЖЕНИЕ А Исходный код программы");
    let mut req = upload("with appendix", &raw, "Курсовая работа");
    req.author = Some("  ".into());
    let doc = engine.upload(req).unwrap();

    assert_eq!(doc.category.as_str(), "Курсовая_работа");
    assert!(!doc.content.contains("ПРИЛОЖЕНИЕ"));
    assert_eq!(doc.author, None);
    assert_eq!(doc.filename.as_deref(), Some("with appendix.docx"));
    let path = doc.file_path.clone().unwrap();
    assert_eq!(engine.store().read_original(&path).unwrap(), raw.as_bytes());
    assert_eq!(doc.signature.len(), 128);
}

#[test]
fn disjoint_vocabularies_stay_near_zero() {
    let fp = Fingerprinter::default();
    let mut total = 0u32;
    let trials = 20;
    for t in 0..trials {
        let a: Vec<String> = (0..200).map(|i| format!("alpha{t}x{i}")).collect();
        let b: Vec<String> = (0..200).map(|i| format!("beta{t}y{i}")).collect();
        let sa = fp.fingerprint(&a.join(" ")).signature;
        let sb = fp.fingerprint(&b.join(" ")).signature;
        let s = compare(&sa, &sb).percent() as u32;
        assert!(s < 15, "trial {t}: {s}%");
        total += s;
    }
    assert!(total / trials < 5);
}
