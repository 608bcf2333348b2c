//! Test result reporting.
//!
//! A [`Reporter`] collects what happened during one test (steps, HTTP
//! exchanges, attachments and labels) and hands the finished
//! [`TestResult`] to a [`ResultSink`]. [`DirectorySink`] writes the
//! results directory layout understood by Allure:
//!
//! ```text
//! allure-results/
//!   <uuid>-result.json
//!   <uuid>-attachment.json
//!   <uuid>-attachment.txt
//! ```
//!
//! The reporter is a small state machine, `idle -> open -> idle`. Only one
//! test can be open at a time; a second `start_test` is rejected with
//! [`Error::TestAlreadyOpen`]. Tests running in parallel each own a reporter.
//!
//! Sensitive headers and query parameters are masked before anything is
//! persisted.
use chrono::Utc;
use console::style;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tabled::{settings::Style, Table, Tabled};
use tracing::*;
use uuid::Uuid;

use crate::{
    http::{Body, LogRequest, Response},
    masking,
};

pub const DEFAULT_RESULTS_DIR: &str = "allure-results";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("test \"{0}\" is still open, end it before starting another one")]
    TestAlreadyOpen(String),
    #[error("no test is open, call start_test first")]
    NoOpenTest,
    #[error("failed to write \"{path}\": {message}")]
    Write { path: PathBuf, message: String },
    #[error("failed to read results from \"{path}\": {message}")]
    Read { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Broken,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Trivial,
    Minor,
    Normal,
    Critical,
    Blocker,
}

/// Labels that group and classify a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LabelKind {
    Tag,
    Severity,
    Suite,
    Epic,
    Feature,
    Story,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LinkKind {
    #[default]
    Link,
    Issue,
    Tms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachmentType {
    #[default]
    Text,
    Json,
    Html,
    Xml,
    Csv,
}

impl AttachmentType {
    pub fn mime(&self) -> &'static str {
        match self {
            AttachmentType::Text => "text/plain",
            AttachmentType::Json => "application/json",
            AttachmentType::Html => "text/html",
            AttachmentType::Xml => "application/xml",
            AttachmentType::Csv => "text/csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AttachmentType::Text => "txt",
            AttachmentType::Json => "json",
            AttachmentType::Html => "html",
            AttachmentType::Xml => "xml",
            AttachmentType::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

/// Reference to an attachment file written next to the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Milliseconds since the Unix epoch.
    pub start: i64,
    pub stop: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub uuid: String,
    pub name: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_html: Option<String>,
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
    pub stage: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub start: i64,
    #[serde(default)]
    pub stop: i64,
}

impl TestResult {
    fn new(name: &str, description: Option<&str>) -> TestResult {
        TestResult {
            uuid: Uuid::new_v4().to_string(),
            name: name.to_string(),
            full_name: name.to_string(),
            description: description.map(str::to_string),
            description_html: None,
            status: None,
            status_details: None,
            stage: "running".to_string(),
            labels: Vec::new(),
            links: Vec::new(),
            parameters: Vec::new(),
            steps: Vec::new(),
            attachments: Vec::new(),
            start: now(),
            stop: 0,
        }
    }

    /// Values of every label named `kind`.
    pub fn labels_of(&self, kind: LabelKind) -> Vec<&str> {
        let kind = kind.to_string();
        self.labels
            .iter()
            .filter(|l| l.name == kind)
            .map(|l| l.value.as_str())
            .collect()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.stop - self.start).max(0)
    }
}

fn now() -> i64 {
    Utc::now().timestamp_millis()
}

/// Destination of finished results.
pub trait ResultSink {
    fn write_attachment(&mut self, source: &str, content: &[u8]) -> Result<()>;

    fn write_result(&mut self, result: &TestResult) -> Result<()>;
}

/// Writes results into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> DirectorySink {
        DirectorySink { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, file_name: &str, content: &[u8]) -> Result<()> {
        let path = self.dir.join(file_name);
        let write_error = |e: std::io::Error| Error::Write {
            path: path.clone(),
            message: e.to_string(),
        };
        std::fs::create_dir_all(&self.dir).map_err(write_error)?;
        std::fs::write(&path, content).map_err(write_error)?;
        debug!("wrote {}", path.display());
        Ok(())
    }
}

impl ResultSink for DirectorySink {
    fn write_attachment(&mut self, source: &str, content: &[u8]) -> Result<()> {
        self.write(source, content)
    }

    fn write_result(&mut self, result: &TestResult) -> Result<()> {
        let file_name = format!("{}-result.json", result.uuid);
        let json = serde_json::to_vec_pretty(result).map_err(|e| Error::Write {
            path: self.dir.join(&file_name),
            message: e.to_string(),
        })?;
        self.write(&file_name, &json)
    }
}

/// Keeps results in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub results: Vec<TestResult>,
    pub attachments: IndexMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn attachment_text(&self, source: &str) -> Option<String> {
        self.attachments
            .get(source)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl ResultSink for MemorySink {
    fn write_attachment(&mut self, source: &str, content: &[u8]) -> Result<()> {
        self.attachments.insert(source.to_string(), content.to_vec());
        Ok(())
    }

    fn write_result(&mut self, result: &TestResult) -> Result<()> {
        self.results.push(result.clone());
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn write_attachment(&mut self, _source: &str, _content: &[u8]) -> Result<()> {
        Ok(())
    }

    fn write_result(&mut self, _result: &TestResult) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReporterSettings {
    pub enabled: bool,
    pub results_dir: PathBuf,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        ReporterSettings {
            enabled: true,
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
        }
    }
}

impl ReporterSettings {
    /// Reads `allure.enabled` and `allure.results_dir` from the `reporting`
    /// section. Missing keys fall back to the defaults.
    pub fn from_reporting(reporting: &Value) -> ReporterSettings {
        let allure = reporting.get("allure");
        let defaults = ReporterSettings::default();
        ReporterSettings {
            enabled: allure
                .and_then(|a| a.get("enabled"))
                .and_then(Value::as_bool)
                .unwrap_or(defaults.enabled),
            results_dir: allure
                .and_then(|a| a.get("results_dir"))
                .and_then(Value::as_str)
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
        }
    }

    pub fn disabled() -> ReporterSettings {
        ReporterSettings {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Attachment content held until its test ends.
#[derive(Debug)]
struct PendingAttachment {
    source: String,
    content: Vec<u8>,
}

/// Records one test at a time into a [`ResultSink`].
///
/// Nothing reaches the sink before [`Reporter::end_test`]: attachments are
/// buffered with the open test and written together with its result.
#[derive(Debug)]
pub struct Reporter<S> {
    sink: S,
    settings: ReporterSettings,
    current: Option<TestResult>,
    pending: Vec<PendingAttachment>,
}

impl<S: ResultSink> Reporter<S> {
    pub fn new(sink: S, settings: ReporterSettings) -> Reporter<S> {
        if !settings.enabled {
            info!("reporting is disabled");
        }
        Reporter {
            sink,
            settings,
            current: None,
            pending: Vec::new(),
        }
    }

    pub fn settings(&self) -> &ReporterSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Whether a test is currently open.
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn start_test(&mut self, name: &str, description: Option<&str>) -> Result<()> {
        if !self.settings.enabled {
            return Ok(());
        }
        if let Some(open) = &self.current {
            return Err(Error::TestAlreadyOpen(open.name.clone()));
        }
        debug!("start test \"{name}\"");
        self.current = Some(TestResult::new(name, description));
        Ok(())
    }

    /// Closes the open test and hands its result to the sink.
    pub fn end_test(&mut self, status: Status) -> Result<()> {
        self.finish(status, None)
    }

    /// Like [`Reporter::end_test`], recording `message` as the status details,
    /// e.g. the text of an assertion failure.
    pub fn end_test_with_message(&mut self, status: Status, message: impl fmt::Display) -> Result<()> {
        self.finish(status, Some(message.to_string()))
    }

    fn finish(&mut self, status: Status, message: Option<String>) -> Result<()> {
        if !self.settings.enabled {
            return Ok(());
        }
        let mut result = self.current.take().ok_or(Error::NoOpenTest)?;
        result.status = Some(status);
        result.status_details = message.map(|message| StatusDetails {
            message: Some(message),
        });
        result.stage = "finished".to_string();
        result.stop = now();

        debug!("end test \"{}\" with {status}", result.name);
        for attachment in std::mem::take(&mut self.pending) {
            self.sink
                .write_attachment(&attachment.source, &attachment.content)?;
        }
        self.sink.write_result(&result)
    }

    /// Runs `f` on the open test. A disabled reporter skips `f`.
    fn with_open<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut TestResult, &mut Vec<PendingAttachment>) -> Result<()>,
    {
        if !self.settings.enabled {
            return Ok(());
        }
        let result = self.current.as_mut().ok_or(Error::NoOpenTest)?;
        f(result, &mut self.pending)
    }

    pub fn add_step(&mut self, name: &str, status: Status, details: Option<&str>) -> Result<()> {
        self.with_open(|result, pending| {
            let mut step = new_step(name, status);
            if let Some(details) = details {
                step.attachments.push(attach(
                    pending,
                    "Step Details",
                    details.as_bytes(),
                    AttachmentType::Text,
                ));
                if status == Status::Failed {
                    step.status_details = Some(StatusDetails {
                        message: Some(details.to_string()),
                    });
                }
            }
            result.steps.push(step);
            Ok(())
        })
    }

    /// Records a request as a step named `<METHOD> <url>`, with its masked
    /// headers and body attached.
    pub fn add_api_request(&mut self, request: &LogRequest) -> Result<()> {
        self.with_open(|result, pending| {
            let url = masking::mask_url(&request.url);
            let mut step = new_step(&format!("{} {url}", request.method), Status::Passed);

            if !request.headers.is_empty() {
                let headers = masking::header_record(&request.headers);
                step.attachments
                    .push(attach_json(pending, "Request Headers", &headers)?);
            }
            if let Some(body) = request.body.as_deref().filter(|b| !b.is_empty()) {
                step.attachments.push(attach_body(pending, "Request Body", body)?);
            }

            result.steps.push(step);
            Ok(())
        })
    }

    /// Records a response as a step named `Response: <status>`, with status,
    /// elapsed time, masked headers and body attached.
    pub fn add_api_response(&mut self, response: &Response) -> Result<()> {
        self.with_open(|result, pending| {
            let status = response.status.as_u16();
            let mut step = new_step(&format!("Response: {status}"), Status::Passed);

            let info = format!(
                "Status: {status}\nTime: {:.2} ms",
                response.elapsed.as_secs_f64() * 1000.0
            );
            step.attachments.push(attach(
                pending,
                "Response Status",
                info.as_bytes(),
                AttachmentType::Text,
            ));
            let headers = masking::header_record(&response.headers);
            step.attachments
                .push(attach_json(pending, "Response Headers", &headers)?);
            step.attachments
                .push(attach_body(pending, "Response Body", &response.text)?);

            result.steps.push(step);
            Ok(())
        })
    }

    /// Records both sides of an exchange.
    pub fn add_exchange(&mut self, response: &Response) -> Result<()> {
        self.add_api_request(&response.request)?;
        self.add_api_response(response)
    }

    pub fn add_attachment(
        &mut self,
        name: &str,
        content: impl AsRef<[u8]>,
        kind: AttachmentType,
    ) -> Result<()> {
        self.with_open(|result, pending| {
            let attachment = attach(pending, name, content.as_ref(), kind);
            result.attachments.push(attachment);
            Ok(())
        })
    }

    pub fn add_label(&mut self, kind: LabelKind, value: &str) -> Result<()> {
        self.with_open(|result, _| {
            result.labels.push(Label {
                name: kind.to_string(),
                value: value.to_string(),
            });
            Ok(())
        })
    }

    pub fn add_tag(&mut self, tag: &str) -> Result<()> {
        self.add_label(LabelKind::Tag, tag)
    }

    pub fn add_severity(&mut self, severity: Severity) -> Result<()> {
        self.add_label(LabelKind::Severity, &severity.to_string())
    }

    pub fn add_suite(&mut self, suite: &str) -> Result<()> {
        self.add_label(LabelKind::Suite, suite)
    }

    pub fn add_epic(&mut self, epic: &str) -> Result<()> {
        self.add_label(LabelKind::Epic, epic)
    }

    pub fn add_feature(&mut self, feature: &str) -> Result<()> {
        self.add_label(LabelKind::Feature, feature)
    }

    pub fn add_story(&mut self, story: &str) -> Result<()> {
        self.add_label(LabelKind::Story, story)
    }

    pub fn add_link(&mut self, url: &str, name: Option<&str>, kind: LinkKind) -> Result<()> {
        self.with_open(|result, _| {
            result.links.push(Link {
                name: name.map(str::to_string),
                url: url.to_string(),
                kind: kind.to_string(),
            });
            Ok(())
        })
    }

    pub fn add_parameter(&mut self, name: &str, value: impl fmt::Display) -> Result<()> {
        self.with_open(|result, _| {
            result.parameters.push(Parameter {
                name: name.to_string(),
                value: value.to_string(),
            });
            Ok(())
        })
    }

    pub fn set_description(&mut self, description: &str, is_html: bool) -> Result<()> {
        self.with_open(|result, _| {
            if is_html {
                result.description_html = Some(description.to_string());
            } else {
                result.description = Some(description.to_string());
            }
            Ok(())
        })
    }
}

fn new_step(name: &str, status: Status) -> Step {
    let now = now();
    Step {
        name: name.to_string(),
        status,
        status_details: None,
        attachments: Vec::new(),
        start: now,
        stop: now,
    }
}

fn attach(
    pending: &mut Vec<PendingAttachment>,
    name: &str,
    content: &[u8],
    kind: AttachmentType,
) -> Attachment {
    let source = format!("{}-attachment.{}", Uuid::new_v4(), kind.extension());
    pending.push(PendingAttachment {
        source: source.clone(),
        content: content.to_vec(),
    });
    Attachment {
        name: name.to_string(),
        content_type: kind.mime().to_string(),
        source,
    }
}

fn attach_json<T: Serialize>(
    pending: &mut Vec<PendingAttachment>,
    name: &str,
    value: &T,
) -> Result<Attachment> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| Error::Write {
        path: PathBuf::from(name),
        message: e.to_string(),
    })?;
    Ok(attach(pending, name, &json, AttachmentType::Json))
}

/// Attaches a body, pretty-printed when it is JSON.
fn attach_body(
    pending: &mut Vec<PendingAttachment>,
    name: &str,
    text: &str,
) -> Result<Attachment> {
    match Body::parse(text) {
        Body::Json(value) => attach_json(pending, name, &value),
        Body::Text(text) => Ok(attach(pending, name, text.as_bytes(), AttachmentType::Text)),
    }
}

/// Aggregated view over a results directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub results: Vec<TestResult>,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Tests")]
    count: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn count(&self, status: Status) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == Some(status))
            .count()
    }

    /// True when no test failed or broke.
    pub fn is_success(&self) -> bool {
        self.count(Status::Failed) == 0 && self.count(Status::Broken) == 0
    }

    /// Per-status counts as a table.
    pub fn table(&self) -> String {
        let rows = [Status::Passed, Status::Failed, Status::Broken, Status::Skipped]
            .into_iter()
            .map(|status| SummaryRow {
                status: status.to_string(),
                count: self.count(status),
            })
            .chain(std::iter::once(SummaryRow {
                status: "total".to_string(),
                count: self.total(),
            }));
        Table::new(rows).with(Style::rounded()).to_string()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            let mark = match result.status {
                Some(Status::Passed) => style("✓").green(),
                Some(Status::Skipped) => style("-").dim(),
                _ => style("✘").red(),
            };
            writeln!(f, "{mark} {} ({}ms)", result.name, result.duration_ms())?;
        }
        write!(f, "{}", self.table())
    }
}

/// Reads every `*-result.json` in `results_dir`, oldest first.
pub fn summarize(results_dir: impl AsRef<Path>) -> Result<Summary> {
    let dir = results_dir.as_ref();
    let read_error = |path: &Path, message: String| Error::Read {
        path: path.to_path_buf(),
        message,
    };

    let entries = std::fs::read_dir(dir).map_err(|e| read_error(dir, e.to_string()))?;
    let mut results = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| read_error(dir, e.to_string()))?.path();
        let is_result = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("-result.json"));
        if !is_result {
            continue;
        }

        let text = std::fs::read_to_string(&path).map_err(|e| read_error(&path, e.to_string()))?;
        match serde_json::from_str::<TestResult>(&text) {
            Ok(result) => results.push(result),
            Err(e) => warn!("skipping malformed result {}: {e}", path.display()),
        }
    }

    results.sort_by_key(|r| r.start);
    Ok(Summary { results })
}
