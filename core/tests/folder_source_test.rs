use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, RgbaImage};
use reader_pipeline::config::PipelineConfig;
use reader_pipeline::error::SourceError;
use reader_pipeline::fs::{FolderSource, Token, natural_cmp, natural_cmp_path, tokenize};
use reader_pipeline::pipeline::LoadCoordinator;
use reader_pipeline::source::{ContentSource, shared};
use reader_pipeline::types::DocumentId;

fn write(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

#[test]
fn natural_cmp_orders_numeric_sections() {
    let names = vec!["ch10.xhtml", "ch2.xhtml", "ch1.xhtml", "ch11.xhtml"];
    let mut sorted = names.clone();
    sorted.sort_by(|a, b| natural_cmp(a, b));
    assert_eq!(sorted, vec!["ch1.xhtml", "ch2.xhtml", "ch10.xhtml", "ch11.xhtml"]);
}

#[test]
fn natural_cmp_path_ignores_case() {
    let a = Path::new("Text/001.XHTML");
    let b = Path::new("text/2.xhtml");
    assert!(natural_cmp_path(a, b).is_lt());
}

#[test]
fn tokenize_splits_numbers_and_text() {
    let tokens = tokenize("Part12-Chap003");
    assert_eq!(tokens.len(), 4);
    assert!(matches!(tokens[0], Token::Text("Part")));
    assert!(matches!(tokens[1], Token::Number("12", 12)));
    assert!(matches!(tokens[2], Token::Text("-Chap")));
    assert!(matches!(tokens[3], Token::Number("003", 3)));
}

#[test]
fn resources_resolve_relative_to_the_chapter() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "OEBPS/text/ch1.xhtml", br#"<img src="../images/a.png"/>"#);
    write(root, "OEBPS/images/a.png", b"png");
    write(root, "secret.txt", b"outside");

    let mut source = FolderSource::open(root).expect("open");
    let resolved = source.resolve_path("../images/a.png", 0);
    assert_eq!(resolved, "OEBPS/images/a.png");
    assert_eq!(source.get_resource(&resolved, 0).unwrap(), b"png");

    let escaping = source.resolve_path("../../../secret.txt", 0);
    assert!(matches!(source.get_resource(&escaping, 0), Err(SourceError::Corrupted { .. })));
    assert!(matches!(source.get_chapter_markup(5), Err(SourceError::NotFound(_))));
}

#[test]
fn folder_chapter_loads_with_inlined_image() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "text/ch1.xhtml", br#"<p>one</p>"#);
    write(root, "text/ch2.xhtml", br#"<p>two <img src="../img/pic.png"/></p>"#);
    write(root, "img/pic.png", &png(8, 8));

    let location = root.to_string_lossy().into_owned();
    let source = FolderSource::open(root).expect("open");
    let coordinator = LoadCoordinator::new(
        DocumentId::from_location(&location),
        shared(source),
        &PipelineConfig::default(),
    );
    assert_eq!(coordinator.chapter_count(), 2);

    let (tx, rx) = mpsc::channel();
    coordinator.on_content_ready(move |ready| {
        let _ = tx.send(ready);
    });
    coordinator.request_chapter(1);

    let ready = rx.recv_timeout(Duration::from_secs(5)).expect("content ready");
    assert!(ready.chapter.markup.starts_with("<p>two <img src=\"data:image/png;base64,"));
    assert_eq!(ready.chapter.resource_count, 1);
}

#[test]
fn escaped_resource_names_reach_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "OEBPS/text/ch1.xhtml",
        br#"<img src="../img/my%20cover.png"/><img src="../img/a&amp;b.png"/>"#,
    );
    write(root, "OEBPS/img/my cover.png", &png(4, 4));
    write(root, "OEBPS/img/a&b.png", &png(4, 4));

    let source = FolderSource::open(root).expect("open");
    assert_eq!(source.resolve_path("../img/my%20cover.png", 0), "OEBPS/img/my cover.png");

    let config = PipelineConfig::default();
    let coordinator = LoadCoordinator::new(DocumentId::new("escaped"), shared(source), &config);
    let (tx, rx) = mpsc::channel();
    coordinator.on_content_ready(move |ready| {
        let _ = tx.send(ready);
    });
    coordinator.request_chapter(0);

    let ready = rx.recv_timeout(Duration::from_secs(5)).expect("content ready");
    assert_eq!(ready.chapter.markup.matches("data:image/png;base64,").count(), 2);
    assert_eq!(ready.chapter.resource_count, 2);
}
