use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use image::GrayImage;
use regex::Regex;
use tracing::debug;

pub const RENDER_DPI: u32 = 300;

static SPLIT_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d)\s+(\d)").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Text recognition over one page image. The engine sees images only; page
/// rendering and treatment selection stay on this side of the seam.
pub trait OcrEngine {
    fn recognize(&self, image: &GrayImage) -> Result<String>;
}

/// Tesseract via its command-line binary, `--oem 3 --psm 6`.
pub struct TesseractCli;

impl OcrEngine for TesseractCli {
    fn recognize(&self, image: &GrayImage) -> Result<String> {
        let scratch = tempfile::tempdir().context("creating OCR scratch dir")?;
        let png = scratch.path().join("page.png");
        image
            .save(&png)
            .with_context(|| format!("writing {}", png.display()))?;

        let output = Command::new("tesseract")
            .arg(&png)
            .arg("stdout")
            .args(["--oem", "3", "--psm", "6"])
            .output()
            .context("running tesseract")?;
        if !output.status.success() {
            bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Render a PDF to one grayscale image per page via `pdftoppm`.
pub fn render_pages(pdf: &Path, dpi: u32) -> Result<Vec<GrayImage>> {
    let scratch = tempfile::tempdir().context("creating render scratch dir")?;
    let prefix = scratch.path().join("page");

    let output = Command::new("pdftoppm")
        .args(["-r", &dpi.to_string(), "-gray", "-png"])
        .arg(pdf)
        .arg(&prefix)
        .output()
        .context("running pdftoppm")?;
    if !output.status.success() {
        bail!(
            "pdftoppm exited with {} on {}: {}",
            output.status,
            pdf.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    // pdftoppm zero-pads page numbers, so name order is page order.
    let mut pngs: Vec<_> = std::fs::read_dir(scratch.path())?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .collect();
    pngs.sort();

    let mut pages = Vec::with_capacity(pngs.len());
    for png in pngs {
        let img = image::open(&png)
            .with_context(|| format!("reading {}", png.display()))?
            .to_luma8();
        pages.push(img);
    }
    Ok(pages)
}

/// Run recognition under three treatments of one page: raw grayscale,
/// contrast-boosted, and inverted (counters white-on-dark stamps and
/// watermark interference). All three outputs are kept; the field heuristics
/// tolerate the duplication.
pub fn recognize_page(engine: &dyn OcrEngine, page: &GrayImage) -> Result<String> {
    let raw = engine.recognize(page)?;

    let boosted = image::imageops::contrast(page, 60.0);
    let contrast = engine.recognize(&boosted)?;

    let mut inverted = boosted;
    image::imageops::invert(&mut inverted);
    let negative = engine.recognize(&inverted)?;

    Ok([raw, contrast, negative].join("\n"))
}

/// OCR an entire artifact into one normalized corpus.
pub fn ocr_artifact(engine: &dyn OcrEngine, pdf: &Path) -> Result<String> {
    let pages = render_pages(pdf, RENDER_DPI)?;
    debug!("{}: {} pages rendered", pdf.display(), pages.len());

    let mut corpus = String::new();
    for page in &pages {
        corpus.push_str(&recognize_page(engine, page)?);
        corpus.push('\n');
    }
    Ok(normalize_text(&corpus))
}

/// Uppercase, rejoin OCR-split digit runs, then collapse whitespace.
pub fn normalize_text(raw: &str) -> String {
    let upper = raw.to_uppercase();
    let joined = SPLIT_DIGITS_RE.replace_all(&upper, "$1$2");
    WHITESPACE_RE.replace_all(&joined, " ").trim().to_string()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn normalize_uppercases_and_collapses() {
        assert_eq!(
            normalize_text("Amount   claimed\n\n$125,430.00"),
            "AMOUNT CLAIMED $125,430.00"
        );
    }

    #[test]
    fn normalize_repairs_split_digits() {
        assert_eq!(normalize_text("case 2 023CH0 01234"), "CASE 2023CH001234");
    }

    #[test]
    fn normalize_empty_is_empty() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("   \n\t "), "");
    }

    struct CountingEngine {
        calls: Cell<usize>,
    }

    impl OcrEngine for CountingEngine {
        fn recognize(&self, _: &GrayImage) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok(format!("pass{}", self.calls.get()))
        }
    }

    #[test]
    fn each_page_is_recognized_under_three_treatments() {
        let engine = CountingEngine {
            calls: Cell::new(0),
        };
        let page = GrayImage::from_pixel(4, 4, image::Luma([128u8]));
        let text = recognize_page(&engine, &page).unwrap();
        assert_eq!(engine.calls.get(), 3);
        assert_eq!(text, "pass1\npass2\npass3");
    }
}
