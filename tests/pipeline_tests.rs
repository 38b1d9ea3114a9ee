//! Integration tests for the full conversion pipeline.

use std::io::Write;
use std::path::{Path, PathBuf};

use mbox2pdf::error::{ConvertError, EmitError};
use mbox2pdf::export::OutputFormat;
use mbox2pdf::model::diagnostic::{DiagnosticReason, Severity};
use mbox2pdf::parser::mbox::MboxReader;
use mbox2pdf::parser::message::{normalize, Normalized};
use mbox2pdf::pipeline::{convert, ConvertOptions};
use mbox2pdf::report::RunSummary;
use mbox2pdf::sequence::sequence;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn html_options() -> ConvertOptions {
    ConvertOptions {
        format: OutputFormat::Html,
        ..ConvertOptions::default()
    }
}

fn convert_to(dir: &Path, name: &str, options: &ConvertOptions) -> (RunSummary, PathBuf) {
    let output = dir.join(name);
    let summary = convert(&fixture("takeout.mbox"), &output, options, None).unwrap();
    (summary, output)
}

fn write_archive(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("archive.mbox");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ─── Counting ───────────────────────────────────────────────────────

#[test]
fn test_reader_finds_every_record() {
    let reader = MboxReader::open(fixture("takeout.mbox")).unwrap();
    let raws: Vec<_> = reader.map(|r| r.unwrap()).collect();
    assert_eq!(raws.len(), 5);
    assert_eq!(
        raws.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
    // mboxrd quoting is undone
    let undated = String::from_utf8_lossy(&raws[3].bytes);
    assert!(undated.contains("\nFrom the archive, with love."));
    assert!(!undated.contains(">From the archive"));
}

#[test]
fn test_outcomes_add_up() {
    let dir = tempfile::tempdir().unwrap();
    let (summary, output) = convert_to(dir.path(), "out.pdf", &ConvertOptions::default());

    assert!(output.exists());
    assert_eq!(summary.found, 5);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.degraded, 1);
    assert_eq!(summary.rendered, 3);
    assert_eq!(
        summary.rendered + summary.degraded + summary.skipped,
        summary.found
    );
    assert_eq!(summary.processed(), 4);
    assert_eq!(summary.output.as_deref(), Some(output.as_path()));
}

// ─── Ordering ───────────────────────────────────────────────────────

#[test]
fn test_messages_come_out_in_date_order() {
    let dir = tempfile::tempdir().unwrap();
    let (_, output) = convert_to(dir.path(), "out.html", &html_options());
    let html = std::fs::read_to_string(output).unwrap();

    let titles = [
        "<h3>Email 1: Happy new year</h3>",
        "<h3>Email 2: Café meeting</h3>",
        "<h3>Email 3: Photo from the trip</h3>",
        "<h3>Email 4: Undated note</h3>",
    ];
    let positions: Vec<usize> = titles
        .iter()
        .map(|t| html.find(t).unwrap_or_else(|| panic!("missing {t}")))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_sequence_of_normalized_fixture() {
    let normalized: Vec<_> = MboxReader::open(fixture("takeout.mbox"))
        .unwrap()
        .map(|r| normalize(&r.unwrap()))
        .filter_map(|n| match n {
            Normalized::Ok { message, .. } => Some(*message),
            Normalized::Skipped(_) => None,
        })
        .collect();
    let ordered = sequence(normalized);
    let dates: Vec<String> = ordered
        .iter()
        .map(|o| o.message.sent_at.short_display())
        .collect();
    assert_eq!(
        dates,
        vec![
            "2020-01-01 09:30",
            "2021-03-01 10:00",
            "2021-03-02 08:15",
            "undated"
        ]
    );
}

#[test]
fn test_missing_date_is_kept_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (summary, output) = convert_to(dir.path(), "out.html", &html_options());

    let missing: Vec<_> = summary
        .diagnostics
        .iter()
        .filter(|d| d.reason == DiagnosticReason::MissingDate)
        .collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].message_index, 3);
    assert_eq!(missing[0].reason.severity(), Severity::Degraded);

    let html = std::fs::read_to_string(output).unwrap();
    assert!(html.contains("<strong>Date:</strong> Unknown date"));
}

// ─── Failure isolation ──────────────────────────────────────────────

#[test]
fn test_broken_header_is_skipped_once() {
    let dir = tempfile::tempdir().unwrap();
    let (summary, output) = convert_to(dir.path(), "out.html", &html_options());

    let skipped: Vec<_> = summary
        .diagnostics
        .iter()
        .filter(|d| d.reason.severity() == Severity::Skipped)
        .collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].message_index, 4);
    assert_eq!(skipped[0].reason, DiagnosticReason::Unparseable);
    assert!(skipped[0].recoverable);

    let html = std::fs::read_to_string(output).unwrap();
    assert!(!html.contains("broken subject line"));
}

#[test]
fn test_messages_after_a_broken_one_survive() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_archive(
        dir.path(),
        "From a Mon Mar 01 10:00:00 2021\n\
Subject: =?UTF-8?Q?never_closed\n\
Date: Mon, 01 Mar 2021 10:00:00 +0000\n\
\n\
broken\n\
\n\
From b Mon Mar 01 10:00:00 2021\n\
Subject: fine\n\
Date: Mon, 01 Mar 2021 11:00:00 +0000\n\
\n\
still here\n",
    );
    let output = dir.path().join("out.html");
    let summary = convert(&input, &output, &html_options(), None).unwrap();
    assert_eq!((summary.found, summary.skipped, summary.rendered), (2, 1, 1));
    assert!(std::fs::read_to_string(output)
        .unwrap()
        .contains("still here"));
}

#[test]
fn test_broken_mime_and_lossy_bodies_are_counted() {
    let dir = tempfile::tempdir().unwrap();

    let mut deep = String::from("From c Mon Mar 01 10:00:00 2021\nSubject: deep\nMIME-Version: 1.0\n");
    for i in 0..14 {
        deep.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"b{i}\"\n\n--b{i}\n"
        ));
    }
    deep.push_str("Content-Type: text/plain\n\ninner\n");
    for i in (0..14).rev() {
        deep.push_str(&format!("--b{i}--\n"));
    }

    let archive = format!(
        "From a Mon Mar 01 10:00:00 2021\n\
Subject: fine\n\
Date: Mon, 01 Mar 2021 10:00:00 +0000\n\
\n\
all good\n\
\n\
From b Mon Mar 01 10:00:00 2021\n\
Subject: garbled\n\
Date: Mon, 01 Mar 2021 11:00:00 +0000\n\
MIME-Version: 1.0\n\
Content-Type: text/plain; charset=UTF-8\n\
Content-Transfer-Encoding: base64\n\
\n\
@@@@ this is not base64 ####\n\
\n\
{deep}"
    );
    let input = write_archive(dir.path(), &archive);
    let output = dir.path().join("out.html");
    let summary = convert(&input, &output, &html_options(), None).unwrap();

    assert_eq!(summary.found, 3);
    assert_eq!(summary.rendered, 1);
    assert_eq!(summary.degraded, 1);
    assert_eq!(summary.skipped, 1);

    let reasons: Vec<_> = summary
        .diagnostics
        .iter()
        .map(|d| (d.message_index, d.reason))
        .collect();
    assert!(reasons.contains(&(1, DiagnosticReason::EncodingProblem)));
    assert!(reasons.contains(&(2, DiagnosticReason::MalformedMime)));

    let html = std::fs::read_to_string(output).unwrap();
    assert!(html.contains("Email 2: garbled"));
    assert!(!html.contains(": deep</h3>"));
}

// ─── Sanitizing ─────────────────────────────────────────────────────

#[test]
fn test_script_never_reaches_html_output() {
    let dir = tempfile::tempdir().unwrap();
    let (_, output) = convert_to(dir.path(), "out.html", &html_options());
    let html = std::fs::read_to_string(output).unwrap();

    assert!(!html.contains("<script"));
    assert!(!html.contains("alert("));
    assert!(!html.contains("tracker.example.org"));
    assert!(html.contains("Unsubscribe [https://example.org/unsubscribe]"));
}

#[test]
fn test_script_never_reaches_pdf_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = ConvertOptions::default();
    options.pdf.compress = false;
    let (_, output) = convert_to(dir.path(), "out.pdf", &options);
    let bytes = std::fs::read(output).unwrap();

    assert!(contains(&bytes, b"newsletter team"));
    assert!(!contains(&bytes, b"alert"));
}

// ─── Document structure ─────────────────────────────────────────────

#[test]
fn test_pdf_has_a_bookmark_per_message_and_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let (_, output) = convert_to(dir.path(), "out.pdf", &ConvertOptions::default());
    let doc = lopdf::Document::load(&output).unwrap();

    assert!(doc.get_pages().len() >= 4);

    let catalog = doc.catalog().unwrap();
    let outlines_id = catalog.get(b"Outlines").unwrap().as_reference().unwrap();
    let outlines = doc.get_dictionary(outlines_id).unwrap();
    assert_eq!(outlines.get(b"Count").unwrap().as_i64().unwrap(), 4);

    let images = doc
        .objects
        .values()
        .filter(|o| match o {
            lopdf::Object::Stream(s) => {
                matches!(s.dict.get(b"Subtype"), Ok(lopdf::Object::Name(n)) if n == b"Image")
            }
            _ => false,
        })
        .count();
    assert_eq!(images, 1);
}

#[test]
fn test_images_can_be_turned_off() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = html_options();
    options.render.embed_images = false;
    let (_, output) = convert_to(dir.path(), "out.html", &options);
    let html = std::fs::read_to_string(output).unwrap();

    assert!(!html.contains("<img"));
    assert!(html.contains("dot.png"));
}

#[test]
fn test_reruns_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let (_, first) = convert_to(dir.path(), "first.pdf", &ConvertOptions::default());
    let (_, second) = convert_to(dir.path(), "second.pdf", &ConvertOptions::default());
    assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());

    let (_, first) = convert_to(dir.path(), "first.html", &html_options());
    let (_, second) = convert_to(dir.path(), "second.html", &html_options());
    assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());
}

// ─── Fatal errors ───────────────────────────────────────────────────

#[test]
fn test_missing_archive_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.pdf");
    let err = convert(
        &dir.path().join("missing.mbox"),
        &output,
        &ConvertOptions::default(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, ConvertError::FileNotFound(_)));
    assert!(!output.exists());
}

#[test]
fn test_unwritable_output_is_fatal_before_reading() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("no-such-dir").join("out.pdf");
    let err = convert(&fixture("takeout.mbox"), &output, &ConvertOptions::default(), None)
        .unwrap_err();
    assert!(matches!(
        err,
        ConvertError::Emit(EmitError::OutputNotWritable { .. })
    ));
    assert!(!output.exists());
}

#[test]
fn test_non_mbox_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_archive(dir.path(), "just some notes\nnot an archive\n");
    let err = convert(
        &input,
        &dir.path().join("out.pdf"),
        &ConvertOptions::default(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, ConvertError::ArchiveUnreadable { .. }));
}

#[test]
fn test_nothing_usable_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.pdf");

    let empty = write_archive(dir.path(), "");
    let err = convert(&empty, &output, &ConvertOptions::default(), None).unwrap_err();
    assert!(matches!(err, ConvertError::NothingToRender(_)));

    let all_broken = write_archive(
        dir.path(),
        "From a Mon Mar 01 10:00:00 2021\nSubject: =?UTF-8?B?AAAA\n\nbody\n",
    );
    let err = convert(&all_broken, &output, &ConvertOptions::default(), None).unwrap_err();
    assert!(matches!(err, ConvertError::NothingToRender(_)));
    assert!(!output.exists());
}
