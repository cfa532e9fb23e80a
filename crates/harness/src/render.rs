//! PNG artifacts for trace records

use serde_json::Value;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::node;

/// Viewport width for rendered payloads; height grows with the page
const RENDER_WIDTH: u32 = 1000;

/// Turns a JSON payload into image bytes
pub trait ArtifactRenderer: Send + Sync {
    fn render(&self, title: &str, payload: &Value) -> HarnessResult<Vec<u8>>;
}

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Standalone page showing one pretty-printed payload
pub fn payload_page(title: &str, payload: &Value) -> HarnessResult<String> {
    let pretty = serde_json::to_string_pretty(payload)?;
    Ok(format!(
        r#"<html><head><meta charset="utf-8">
<style>
  body{{font-family:-apple-system,Segoe UI,Roboto,system-ui,sans-serif;background:#0b0f14;color:#e6e6e6;margin:0}}
  .card{{margin:0;padding:24px}}
  h1{{font-size:16px;margin:0 0 8px;color:#cbd5e1}}
  pre{{background:#0f1622;border:1px solid #24324a;border-radius:10px;padding:12px;margin:0;white-space:pre-wrap}}
</style></head>
<body><div class="card">
  <h1>{}</h1>
  <pre>{}</pre>
</div></body></html>
"#,
        escape_html(title),
        escape_html(&pretty)
    ))
}

/// Screenshots [`payload_page`] with headless Chromium
pub struct PlaywrightRenderer {
    width: u32,
}

impl PlaywrightRenderer {
    /// Fails with [`HarnessError::PlaywrightNotFound`] when Playwright is missing
    pub fn new() -> HarnessResult<Self> {
        node::check_playwright_installed()?;
        Ok(Self { width: RENDER_WIDTH })
    }

    pub fn build_script(&self, html_path: &str, png_path: &str) -> HarnessResult<String> {
        Ok(format!(
            r#"
const {{ chromium }} = require('playwright');
const fs = require('fs');

(async () => {{
  const browser = await chromium.launch({{ headless: true }});
  try {{
    const page = await browser.newPage({{ viewport: {{ width: {width}, height: 10 }} }});
    await page.setContent(fs.readFileSync({html}, 'utf8'));
    await page.screenshot({{ path: {png}, fullPage: true }});
    console.log(JSON.stringify({{ success: true }}));
  }} catch (error) {{
    console.error(JSON.stringify({{ success: false, error: error.message }}));
    process.exit(1);
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            width = self.width,
            html = node::js_literal(html_path)?,
            png = node::js_literal(png_path)?,
        ))
    }
}

impl ArtifactRenderer for PlaywrightRenderer {
    fn render(&self, title: &str, payload: &Value) -> HarnessResult<Vec<u8>> {
        let workdir = tempfile::tempdir()?;
        let html_path = workdir.path().join("payload.html");
        let png_path = workdir.path().join("payload.png");
        std::fs::write(&html_path, payload_page(title, payload)?)?;

        let script = self.build_script(&html_path.to_string_lossy(), &png_path.to_string_lossy())?;
        node::run_script(&script, workdir.path())?;

        debug!("Rendered '{}' to {}", title, png_path.display());
        std::fs::read(&png_path).map_err(|e| HarnessError::Render(format!("{}: {}", png_path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"<a href="x">&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;&lt;/a&gt;");
    }

    #[test]
    fn test_payload_page_is_escaped() {
        let page = payload_page("Request <JSON>", &json!({ "html": "<script>alert(1)</script>" })).unwrap();
        assert!(page.contains("Request &lt;JSON&gt;"));
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }
}
