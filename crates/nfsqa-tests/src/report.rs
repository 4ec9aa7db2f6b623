//! Suite reports: JSON for machines, JUnit XML for CI dashboards.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, FailureRecord};
use crate::lifecycle::{TestOutcome, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl From<Verdict> for TestStatus {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Pass => TestStatus::Pass,
            Verdict::Fail => TestStatus::Fail,
            Verdict::Error => TestStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub suite: String,
    pub status: TestStatus,
    pub duration: Duration,
    pub message: Option<String>,
    /// Every recorded failure, primary first
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
}

impl TestCaseResult {
    pub fn new(name: &str, suite: &str, status: TestStatus, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            suite: suite.to_string(),
            status,
            duration,
            message: None,
            failures: vec![],
        }
    }

    pub fn skipped(name: &str, suite: &str, reason: &str) -> Self {
        Self::new(name, suite, TestStatus::Skip, Duration::default()).with_message(reason)
    }

    pub fn from_outcome(suite: &str, outcome: &TestOutcome) -> Self {
        let mut result = Self::new(&outcome.name, suite, outcome.verdict.into(), outcome.duration);
        result.message = outcome.primary_failure().map(|f| f.to_string());
        result.failures = outcome.failures.clone();
        result
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Failures recorded while releasing resources.
    pub fn teardown_failures(&self) -> impl Iterator<Item = &FailureRecord> {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::Teardown)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteReport {
    pub name: String,
    pub timestamp: u64,
    pub duration: Duration,
    pub cases: Vec<TestCaseResult>,
}

impl TestSuiteReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            duration: Duration::default(),
            cases: vec![],
        }
    }

    pub fn add_result(&mut self, result: TestCaseResult) {
        self.cases.push(result);
    }

    fn count(&self, status: TestStatus) -> usize {
        self.cases.iter().filter(|c| c.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(TestStatus::Pass)
    }

    /// Cases whose expectations did not hold
    pub fn failed(&self) -> usize {
        self.count(TestStatus::Fail)
    }

    /// Cases that could not be carried out
    pub fn errors(&self) -> usize {
        self.count(TestStatus::Error)
    }

    pub fn skipped(&self) -> usize {
        self.count(TestStatus::Skip)
    }

    pub fn total(&self) -> usize {
        self.cases.len()
    }

    pub fn pass_rate(&self) -> f64 {
        let ran = self.total() - self.skipped();
        if ran == 0 {
            return 0.0;
        }
        self.passed() as f64 / ran as f64
    }

    pub fn is_passing(&self) -> bool {
        self.failed() == 0 && self.errors() == 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_junit_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\" timestamp=\"{}\">\n",
            escape(&self.name),
            self.total(),
            self.failed(),
            self.errors(),
            self.skipped(),
            self.duration.as_secs_f64(),
            self.timestamp
        ));

        for case in &self.cases {
            xml.push_str(&format!(
                "  <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\">\n",
                escape(&case.name),
                escape(&case.suite),
                case.duration.as_secs_f64()
            ));
            let message = case.message.as_deref().unwrap_or("test failed");
            match case.status {
                TestStatus::Pass => {}
                TestStatus::Skip => {
                    xml.push_str(&format!("    <skipped message=\"{}\" />\n", escape(message)));
                }
                TestStatus::Fail | TestStatus::Error => {
                    let tag = if case.status == TestStatus::Fail {
                        "failure"
                    } else {
                        "error"
                    };
                    let kind = case
                        .failures
                        .first()
                        .map(|f| f.kind.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    let body: Vec<String> = case.failures.iter().map(|f| escape(&f.to_string())).collect();
                    xml.push_str(&format!(
                        "    <{tag} message=\"{msg}\" type=\"{kind}\">{body}</{tag}>\n",
                        tag = tag,
                        msg = escape(message),
                        kind = kind,
                        body = body.join("\n")
                    ));
                }
            }
            xml.push_str("  </testcase>\n");
        }

        xml.push_str("</testsuite>\n");
        xml
    }

    pub fn summary_line(&self) -> String {
        let time = self.duration.as_secs_f64();
        let ran = self.total() - self.skipped();
        if !self.is_passing() {
            format!(
                "FAIL {}/{} ({} failed, {} errors, {} skipped) in {:.2}s",
                self.passed(),
                ran,
                self.failed(),
                self.errors(),
                self.skipped(),
                time
            )
        } else if self.skipped() > 0 {
            format!("PASS {}/{} ({} skipped) in {:.2}s", self.passed(), ran, self.skipped(), time)
        } else {
            format!("PASS {}/{} in {:.2}s", self.passed(), ran, time)
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
