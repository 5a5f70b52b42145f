mod common;

use common::{fake_engines, read_lines, test_config, write_fake_pdf};
use exam_slicer::{
    boundary::RegexMatcher,
    engine::PdfBackend,
    merge::{PageRef, merge_sources},
    pipeline::{PageStatus, Pipeline, StudentSubmission},
    slice::{ChunkSpec, export_chunks},
};
use tempfile::tempdir;

#[test]
fn merge_preserves_file_then_page_order() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.pdf");
    let b = dir.path().join("b.pdf");
    write_fake_pdf(&a, &["a1", "a2", "a3"]);
    write_fake_pdf(&b, &["b1", "b2", "b3"]);

    let (backend, _) = fake_engines();
    let doc = merge_sources(&backend, &[a, b]).unwrap();
    assert_eq!(doc.page_count(), 6);
    let order: Vec<(usize, u32)> = doc.pages.iter().map(|p| (p.source, p.page)).collect();
    assert_eq!(order, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
}

#[test]
fn merge_fails_on_any_corrupt_source() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("a.pdf");
    let bad = dir.path().join("b.pdf");
    write_fake_pdf(&good, &["a1"]);
    std::fs::write(&bad, "garbage").unwrap();

    let (backend, _) = fake_engines();
    let err = merge_sources(&backend, &[good, bad]).unwrap_err();
    assert!(format!("{err:#}").contains("unreadable source document"));
}

#[test]
fn empty_source_contributes_no_pages() {
    let dir = tempdir().unwrap();
    let empty = dir.path().join("a.pdf");
    let full = dir.path().join("b.pdf");
    write_fake_pdf(&empty, &[]);
    write_fake_pdf(&full, &["b1", "b2"]);

    let (backend, _) = fake_engines();
    let doc = merge_sources(&backend, &[empty, full]).unwrap();
    assert_eq!(doc.pages, vec![PageRef { source: 1, page: 0 }, PageRef { source: 1, page: 1 }]);
}

#[test]
fn unreadable_pages_are_skipped_not_fatal() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("scan.pdf");
    write_fake_pdf(
        &src,
        &["Question 1", "#unreadable", "#unrender", "Question 2", "#draw more"],
    );

    let cfg = test_config();
    let matcher = RegexMatcher::from_config(&cfg).unwrap();
    let (backend, recognizer) = fake_engines();
    let pipeline = Pipeline::new(&cfg, backend, recognizer, &matcher);
    let plan = pipeline
        .plan(&StudentSubmission {
            student_id: "s1".into(),
            sources: vec![src],
        })
        .unwrap();

    assert_eq!(plan.skipped_pages(), 2);
    assert!(matches!(plan.pages[1].status, PageStatus::Skipped { .. }));
    assert!(!plan.pages[2].drawing_heavy);
    assert_eq!(
        plan.boundaries.iter().map(|b| b.page).collect::<Vec<_>>(),
        vec![0, 3]
    );
    assert_eq!(plan.chunks.len(), 2);
    assert!(!plan.chunks[0].drawing_heavy);
    assert!(plan.chunks[1].drawing_heavy);
    assert_eq!(plan.chunks[1].drawing_pages, vec![4]);
}

#[test]
fn run_submission_writes_one_file_per_question() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in");
    let out = dir.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    let p1 = input.join("part1.pdf");
    let p2 = input.join("part2.pdf");
    write_fake_pdf(&p1, &["cover sheet", "Question 1", "work"]);
    write_fake_pdf(&p2, &["#draw Question 2 diagram", "Question 3", "end"]);

    let cfg = test_config();
    let matcher = RegexMatcher::from_config(&cfg).unwrap();
    let (backend, recognizer) = fake_engines();
    let pipeline = Pipeline::new(&cfg, backend, recognizer, &matcher);
    let (_, export) = pipeline
        .run_submission(
            &StudentSubmission {
                student_id: "alice".into(),
                sources: vec![p1, p2],
            },
            &out,
        )
        .unwrap();
    assert!(export.failed.is_empty());
    let written = export.written;

    let names: Vec<String> = written
        .iter()
        .map(|c| c.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "alice_Question_1.pdf",
            "alice_Question_2_drawing.pdf",
            "alice_Question_3.pdf"
        ]
    );
    for c in &written {
        assert!(c.path.starts_with(out.join("alice")));
    }
    // Cover sheet folds into the first question; the second file's pages follow.
    assert_eq!(
        read_lines(&written[0].path),
        vec!["part1.pdf:0", "part1.pdf:1", "part1.pdf:2"]
    );
    assert_eq!(read_lines(&written[1].path), vec!["part2.pdf:0"]);
    assert_eq!(read_lines(&written[2].path), vec!["part2.pdf:1", "part2.pdf:2"]);
}

#[test]
fn document_without_headings_exports_unsplit() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("scan.pdf");
    write_fake_pdf(&src, &["page one", "page two"]);

    let cfg = test_config();
    let matcher = RegexMatcher::from_config(&cfg).unwrap();
    let (backend, recognizer) = fake_engines();
    let pipeline = Pipeline::new(&cfg, backend, recognizer, &matcher);
    let (plan, export) = pipeline
        .run_submission(
            &StudentSubmission {
                student_id: "bob".into(),
                sources: vec![src],
            },
            dir.path(),
        )
        .unwrap();
    let written = export.written;

    assert!(plan.boundaries.is_empty());
    assert_eq!(written.len(), 1);
    assert_eq!((written[0].start, written[0].end), (0, 2));
    assert!(written[0].path.ends_with("bob/bob_unsplit.pdf"));
}

#[test]
fn empty_chunk_range_is_skipped() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("scan.pdf");
    write_fake_pdf(&src, &["Question 1", "Question 2"]);

    let cfg = test_config();
    let (backend, _) = fake_engines();
    let doc = merge_sources(&backend, &[src]).unwrap();
    let chunks = vec![
        ChunkSpec {
            start: 0,
            end: 0,
            label: "Question 1".into(),
            drawing_heavy: false,
            drawing_pages: vec![],
        },
        ChunkSpec {
            start: 0,
            end: 2,
            label: "Question 2".into(),
            drawing_heavy: false,
            drawing_pages: vec![],
        },
    ];
    let written = export_chunks(&cfg, &backend, &doc, "s", dir.path(), &chunks).written;
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].label, "Question 2");
    assert!(!dir.path().join("s_Question_1.pdf").exists());
    assert!(backend.doctor().unwrap().ok);
}

#[test]
fn failed_write_removes_its_partial_file_and_continues() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("scan.pdf");
    write_fake_pdf(&src, &["Question 1", "Question 2", "Question 3"]);

    let cfg = test_config();
    let (backend, _) = fake_engines();
    let backend = backend.failing_write(2);
    let doc = merge_sources(&backend, &[src]).unwrap();
    let chunks: Vec<ChunkSpec> = (0..3)
        .map(|i| ChunkSpec {
            start: i,
            end: i + 1,
            label: format!("Question {}", i + 1),
            drawing_heavy: false,
            drawing_pages: vec![],
        })
        .collect();

    let out = dir.path().join("s");
    std::fs::create_dir_all(&out).unwrap();
    let export = export_chunks(&cfg, &backend, &doc, "s", &out, &chunks);

    assert_eq!(
        export.written.iter().map(|c| c.label.as_str()).collect::<Vec<_>>(),
        vec!["Question 1", "Question 3"]
    );
    assert_eq!(export.failed.len(), 1);
    assert_eq!((export.failed[0].start, export.failed[0].end), (1, 2));
    assert!(!export.failed[0].path.exists());
    assert_eq!(read_lines(&out.join("s_Question_3.pdf")), vec!["scan.pdf:2"]);
}
