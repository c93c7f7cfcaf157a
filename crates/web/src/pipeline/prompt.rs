//! Prompt synthesis
//!
//! Turns a validated [`TestRequest`] into the instruction document sent to
//! the code-generation model. The rule block is identical for every request,
//! so two requests with the same URL and instruction produce byte-identical
//! prompts.

use autoqa_common::UserId;

use super::error::PipelineError;
use super::protocol::{FAIL_MARKER, PASS_MARKER, RULESET_VERSION};

/// One inbound run request after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    pub target_url: String,
    pub instruction: String,
    pub requester_id: UserId,
}

impl TestRequest {
    /// Validate raw inputs. Both fields are required and the URL must be
    /// absolute http(s).
    pub fn new(
        target_url: Option<&str>,
        instruction: Option<&str>,
        requester_id: impl Into<UserId>,
    ) -> Result<Self, PipelineError> {
        let target_url = target_url.map(str::trim).unwrap_or_default();
        let instruction = instruction.map(str::trim).unwrap_or_default();

        if target_url.is_empty() {
            return Err(PipelineError::Validation("url is required".to_string()));
        }
        if instruction.is_empty() {
            return Err(PipelineError::Validation("instruction is required".to_string()));
        }

        let parsed = url::Url::parse(target_url)
            .map_err(|e| PipelineError::Validation(format!("invalid url: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PipelineError::Validation(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }

        Ok(Self {
            target_url: target_url.to_string(),
            instruction: instruction.to_string(),
            requester_id: requester_id.into(),
        })
    }
}

/// The canonical rule block embedded in every prompt
pub fn ruleset() -> String {
    format!(
        r#"RULES (ruleset {version}):
1. Use 'import {{ chromium }} from "playwright";' ONLY. Do not import or require anything else.
2. Launch the browser with {{ headless: true }} and always close it in a finally block.
3. Navigate with: await page.goto(url, {{ waitUntil: 'domcontentloaded', timeout: 30000 }});
4. Do NOT use waitForNavigation. After navigating or clicking use await page.waitForTimeout(3000); instead.
5. When clicking, try these locators in order and use the first one that matches:
   a. page.getByText(label, {{ exact: false }})
   b. page.getByRole('button', {{ name: label }})
   c. page.getByRole('link', {{ name: label }})
   d. page.locator('button, a', {{ hasText: label }})
   Click with .first().click({{ force: true }}).
6. To verify success, use simple 'if' statements on page state (URL, title, visible text).
7. If every check succeeds, print exactly: console.log("{pass}");
8. Otherwise print exactly: console.log("{fail}"); and then throw an Error describing what failed.
9. Output ONLY raw JavaScript source code. No prose, no explanations, no markdown code fences."#,
        version = RULESET_VERSION,
        pass = PASS_MARKER,
        fail = FAIL_MARKER,
    )
}

/// Build the full prompt for a request
pub fn synthesize(request: &TestRequest) -> String {
    format!(
        "You are a QA Automation Engineer. Write a complete Node.js Playwright script (ES module).\n\
         TARGET URL: {url}\n\
         TASK: {task}\n\
         {rules}\n",
        url = request.target_url,
        task = request.instruction,
        rules = ruleset(),
    )
}
