//! File-format ingestion through the compiled binary: synthesized DOCX and
//! PDF fixtures exercise extraction, status transitions, and retrieval.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn alcove_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("alcove");
    path
}

/// Minimal DOCX (ZIP with word/document.xml) holding the given paragraphs.
fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Structurally valid single-page PDF whose page produces no extractable
/// text (no content stream text operators survive extraction).
fn text_free_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(
        b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 4\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(b"trailer << /Size 4 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    let config_content = format!(
        r#"[storage]
data_root = "{}/data"

[index]
dims = 128

[embedding]
provider = "hashing"

[llm]
provider = "disabled"
"#,
        root.display()
    );
    let config_path = root.join("config/alcove.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_alcove(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = alcove_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run alcove binary at {:?}: {}", binary, e));

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn create_space(config_path: &Path, name: &str) -> String {
    let (stdout, stderr, success) = run_alcove(config_path, &["space", "create", name]);
    assert!(success, "space create failed: {} {}", stdout, stderr);
    stdout.split_whitespace().next().unwrap().to_string()
}

#[test]
fn docx_ingests_and_answers() {
    let (tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Docs");

    let docx_path = tmp.path().join("lease.docx");
    fs::write(
        &docx_path,
        minimal_docx(&["The lease deposit was 42000 rupees", "Paid on March 3rd"]),
    )
    .unwrap();

    let (stdout, stderr, success) = run_alcove(
        &config_path,
        &["save", "file", &space_id, docx_path.to_str().unwrap()],
    );
    assert!(success, "save docx failed: {} {}", stdout, stderr);
    assert!(stdout.contains("[ready]"), "not ready: {}", stdout);

    let (search_out, _, _) = run_alcove(&config_path, &["search", &space_id, "lease deposit"]);
    assert!(search_out.contains("lease deposit"), "search missed: {}", search_out);

    let (ask_out, _, success) = run_alcove(
        &config_path,
        &["ask", &space_id, "how much was the lease deposit"],
    );
    assert!(success, "ask failed: {}", ask_out);
    assert!(ask_out.contains("42000"), "answer missing figure: {}", ask_out);
    // The source labels the originating file.
    assert!(ask_out.contains("source 1:"), "no source line: {}", ask_out);
}

#[test]
fn docx_without_text_is_failed_empty() {
    let (tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Docs");

    let docx_path = tmp.path().join("blank.docx");
    fs::write(&docx_path, minimal_docx(&[])).unwrap();

    let (stdout, _, success) = run_alcove(
        &config_path,
        &["save", "file", &space_id, docx_path.to_str().unwrap()],
    );
    assert!(success, "save should return the failed item: {}", stdout);
    assert!(stdout.contains("[failed]"));
    assert!(stdout.contains("empty"));
}

#[test]
fn pdf_without_extractable_text_is_failed() {
    let (tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Docs");

    let pdf_path = tmp.path().join("scanned.pdf");
    fs::write(&pdf_path, text_free_pdf()).unwrap();

    let (stdout, _, success) = run_alcove(
        &config_path,
        &["save", "file", &space_id, pdf_path.to_str().unwrap()],
    );
    assert!(success, "save should return the failed item: {}", stdout);
    assert!(stdout.contains("[failed]"), "expected failed item: {}", stdout);

    // A failed item is never retrievable.
    let (search_out, _, search_ok) = run_alcove(&config_path, &["search", &space_id, "scanned"]);
    assert!(search_ok);
    assert!(search_out.contains("No results."), "leaked into search: {}", search_out);
}

#[test]
fn failed_items_do_not_satisfy_ask() {
    let (tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Docs");

    let docx_path = tmp.path().join("blank.docx");
    fs::write(&docx_path, minimal_docx(&[])).unwrap();
    run_alcove(
        &config_path,
        &["save", "file", &space_id, docx_path.to_str().unwrap()],
    );

    // The space contains only the failed item, so there is nothing ready
    // to answer from.
    let (stdout, stderr, success) = run_alcove(&config_path, &["ask", &space_id, "anything?"]);
    assert!(!success, "ask should fail: {}", stdout);
    assert!(stderr.contains("no ready items"), "unexpected: {}", stderr);
}

#[test]
fn notes_are_searchable() {
    let (_tmp, config_path) = setup_test_env();
    run_alcove(&config_path, &["init"]);
    let space_id = create_space(&config_path, "Trip");

    run_alcove(
        &config_path,
        &[
            "save",
            "message",
            &space_id,
            "Confirmation code XJQ881",
            "--notes",
            "zanzibar ferry booking",
        ],
    );
    run_alcove(&config_path, &["save", "message", &space_id, "Grocery list"]);

    // The notes text participates in the embedding.
    let (stdout, _, success) = run_alcove(
        &config_path,
        &["search", &space_id, "zanzibar ferry booking"],
    );
    assert!(success);
    assert!(stdout.contains("XJQ881"), "notes not indexed: {}", stdout);
}
