use std::io::{Cursor, Read};
use std::path::Path;

use once_cell::sync::Lazy;
use phf::phf_map;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ExtractionWarning;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Docx,
    Image,
}

static SOURCE_KINDS: phf::Map<&'static str, SourceKind> = phf_map! {
    "pdf" => SourceKind::Pdf,
    "docx" => SourceKind::Docx,
    "png" => SourceKind::Image,
    "jpg" => SourceKind::Image,
    "jpeg" => SourceKind::Image,
};

// 自闭合的 <w:p .../> 是空段落
static DOCX_PARAGRAPH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<w:p(?:\s[^>]*?)?(?:/>|>(.*?)</w:p>)").expect("docx paragraph regex is invalid")
});
static DOCX_PARAGRAPH_PROPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<w:pPr>.*?</w:pPr>").expect("docx paragraph props regex is invalid"));
static DOCX_RUN_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:(tab|br|cr)\b[^>]*/>").expect("docx run regex is invalid")
});

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        SOURCE_KINDS.get(ext.as_str()).copied()
    }
}

/// 上传资料提取出的文本；失败时 text 为空并附带警告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMaterial {
    pub text: String,
    pub kind: Option<SourceKind>,
    pub warning: Option<ExtractionWarning>,
}

impl SourceMaterial {
    fn degraded(kind: Option<SourceKind>, warning: ExtractionWarning) -> Self {
        warn!("⚠️ {}", warning);
        Self {
            text: String::new(),
            kind,
            warning: Some(warning),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// 从上传文件提取纯文本，任何失败都降级为空文本 + 警告
pub async fn extract_text(path: &Path) -> SourceMaterial {
    let Some(kind) = SourceKind::from_path(path) else {
        let name = path.display().to_string();
        return SourceMaterial::degraded(None, ExtractionWarning::Unsupported(name));
    };

    info!("📄 正在提取资料文本: {}", path.display());
    let result = match kind {
        SourceKind::Pdf => extract_pdf(path).await,
        SourceKind::Docx => extract_docx(path).await,
        SourceKind::Image => extract_image(path).await,
    };

    match result {
        Ok(text) if text.trim().is_empty() => SourceMaterial::degraded(Some(kind), ExtractionWarning::NoText),
        Ok(text) => {
            debug!("提取到 {} 个字符", text.chars().count());
            SourceMaterial {
                text,
                kind: Some(kind),
                warning: None,
            }
        }
        Err(warning) => SourceMaterial::degraded(Some(kind), warning),
    }
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractionWarning> {
    tokio::fs::read(path)
        .await
        .map_err(|e| ExtractionWarning::Unreadable(format!("{}: {}", path.display(), e)))
}

async fn extract_pdf(path: &Path) -> Result<String, ExtractionWarning> {
    let bytes = read_bytes(path).await?;
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| ExtractionWarning::Failed(e.to_string()))?
        .map_err(|e| ExtractionWarning::Failed(e.to_string()))
}

async fn extract_docx(path: &Path) -> Result<String, ExtractionWarning> {
    let bytes = read_bytes(path).await?;
    docx_text(&bytes)
}

/// 读取 word/document.xml，每个段落一行
pub fn docx_text(bytes: &[u8]) -> Result<String, ExtractionWarning> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractionWarning::Failed(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractionWarning::Failed(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractionWarning::Failed(e.to_string()))?;

    let paragraphs: Vec<String> = DOCX_PARAGRAPH
        .captures_iter(&xml)
        .map(|para| {
            let body = para.get(1).map_or("", |m| m.as_str());
            let body = DOCX_PARAGRAPH_PROPS.replace_all(body, "");
            DOCX_RUN_CONTENT
                .captures_iter(&body)
                .map(|cap| match (cap.get(1), cap.get(2).map(|m| m.as_str())) {
                    (Some(text), _) => unescape_xml(text.as_str()),
                    (None, Some("tab")) => "\t".to_string(),
                    (None, _) => "\n".to_string(),
                })
                .collect::<String>()
        })
        .collect();

    Ok(paragraphs.join("\n").trim_end().to_string())
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// 图片走外部 tesseract 做 OCR
async fn extract_image(path: &Path) -> Result<String, ExtractionWarning> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .output()
        .await
        .map_err(|e| ExtractionWarning::Failed(format!("无法运行 tesseract: {}", e)))?;

    if !output.status.success() {
        return Err(ExtractionWarning::Failed(format!(
            "tesseract 识别失败: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_docx(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    const DOCUMENT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Photosynthesis</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Plants use light </w:t></w:r><w:r><w:t>&amp; water.</w:t></w:r></w:p>
<w:p/>
</w:body></w:document>"#;

    #[test]
    fn test_source_kind_from_path() {
        assert_eq!(SourceKind::from_path(Path::new("notes.PDF")), Some(SourceKind::Pdf));
        assert_eq!(SourceKind::from_path(Path::new("a/b.docx")), Some(SourceKind::Docx));
        assert_eq!(SourceKind::from_path(Path::new("scan.jpeg")), Some(SourceKind::Image));
        assert_eq!(SourceKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(SourceKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_docx_text_paragraphs() {
        let text = docx_text(&build_docx(DOCUMENT_XML)).unwrap();
        assert_eq!(text, "Photosynthesis\nPlants use light & water.");
    }

    #[test]
    fn test_docx_self_closing_paragraph_and_breaks() {
        let xml = r#"<w:document><w:body>
<w:p w14:paraId="1A2B3C4D"/>
<w:p w:rsidR="00AB"><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr><w:r><w:t>Light</w:t><w:tab/><w:t>energy</w:t><w:br/><w:t>Chlorophyll</w:t></w:r></w:p>
<w:p><w:r><w:t>Glucose</w:t></w:r></w:p>
</w:body></w:document>"#;
        let text = docx_text(&build_docx(xml)).unwrap();
        assert_eq!(text, "\nLight\tenergy\nChlorophyll\nGlucose");
    }

    #[test]
    fn test_docx_text_rejects_non_zip() {
        assert!(matches!(docx_text(b"not a zip"), Err(ExtractionWarning::Failed(_))));
    }

    #[tokio::test]
    async fn test_extract_docx_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.docx");
        std::fs::write(&path, build_docx(DOCUMENT_XML)).unwrap();

        let material = extract_text(&path).await;
        assert_eq!(material.kind, Some(SourceKind::Docx));
        assert!(material.warning.is_none());
        assert!(material.text.starts_with("Photosynthesis"));
    }

    #[tokio::test]
    async fn test_extract_unsupported_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "plain notes").unwrap();

        let material = extract_text(&path).await;
        assert!(material.is_empty());
        assert!(matches!(material.warning, Some(ExtractionWarning::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_extract_missing_file_degrades() {
        let material = extract_text(Path::new("/definitely/not/here.pdf")).await;
        assert!(material.is_empty());
        assert_eq!(material.kind, Some(SourceKind::Pdf));
        assert!(matches!(material.warning, Some(ExtractionWarning::Unreadable(_))));
    }

    #[tokio::test]
    async fn test_extract_corrupt_pdf_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4 garbage").unwrap();

        let material = extract_text(&path).await;
        assert!(material.is_empty());
        assert!(material.warning.is_some());
    }
}
