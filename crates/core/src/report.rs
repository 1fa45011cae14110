//! Build-time diagnostic report.
//!
//! Processors record structural facts here while they register. The report
//! is only ever read by humans (logs, `skein report`); nothing at run time
//! consults it.

use crate::resolver::Resolvers;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    lines: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    resolvers: Vec<Resolvers>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sections: Vec<Report>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Open a nested section and return it for further recording.
    pub fn open(&mut self, title: impl Into<String>) -> &mut Report {
        self.sections.push(Report::new(title));
        let last = self.sections.len() - 1;
        &mut self.sections[last]
    }

    pub fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Record a snapshot of a resolver picture.
    pub fn add(&mut self, resolvers: &Resolvers) {
        self.resolvers.push(resolvers.clone());
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn sections(&self) -> &[Report] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.resolvers.is_empty() && self.sections.iter().all(Report::is_empty)
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        writeln!(f, "{indent}{}", self.title)?;
        for line in &self.lines {
            writeln!(f, "{indent}  {line}")?;
        }
        for resolvers in &self.resolvers {
            for row in resolvers.to_string().lines() {
                writeln!(f, "{indent}  {row}")?;
            }
        }
        for section in &self.sections {
            section.render(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}
