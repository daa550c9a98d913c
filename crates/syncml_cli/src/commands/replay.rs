//! Replay command implementation.
//!
//! Feeds recorded client messages, in order, through one in-memory server
//! and reports what the server answered. Message files are named
//! `client_<n>.xml`; responses are written as `server_<n>.xml`.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use syncml_engine::MemoryBackend;
use syncml_protocol::{
    mime, ElementDecoder, ElementHandler, ProtocolResult, StatusCode, XmlDecoder,
};
use syncml_server::{ServerConfig, SyncServer};
use tracing::{info, warn};

/// Result of replaying one directory.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Directory the messages were read from.
    pub dir: String,
    /// One entry per client message, in replay order.
    pub messages: Vec<MessageReport>,
    /// Sessions still waiting for a client message after the replay.
    pub open_sessions: usize,
}

/// Outcome of one client message.
#[derive(Debug, Serialize)]
pub struct MessageReport {
    /// File name of the client message.
    pub file: String,
    /// Size of the response in bytes, or `None` if the message failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_bytes: Option<usize>,
    /// Statuses the server returned.
    pub statuses: Vec<StatusLine>,
    /// Other commands the server sent, by name.
    pub commands: Vec<String>,
    /// The response closed the server's package.
    pub is_final: bool,
    /// Error text when the server rejected the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One `<Status>` of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    /// Command the status answers.
    pub cmd: String,
    /// Status code.
    pub code: u16,
}

/// Runs the replay command.
pub fn run(
    dir: &Path,
    credentials: Option<(String, String)>,
    out: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = replay(dir, credentials.as_ref().map(|(u, p)| (u.as_str(), p.as_str())), out)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Replays every `client_<n>.xml` of `dir` in numeric order.
pub fn replay(
    dir: &Path,
    credentials: Option<(&str, &str)>,
    out: Option<&Path>,
) -> Result<ReplayReport, Box<dyn std::error::Error>> {
    let files = message_files(dir)?;
    if files.is_empty() {
        return Err(format!("No client_*.xml messages found in {:?}", dir).into());
    }
    if let Some(out) = out {
        fs::create_dir_all(out)?;
    }

    let backend = MemoryBackend::new();
    if let Some((user, password)) = credentials {
        backend.add_user(user, password);
    }
    let server = SyncServer::new(ServerConfig::default(), backend);

    let mut messages = Vec::with_capacity(files.len());
    for (number, path) in files {
        let file = file_name(&path);
        let request = fs::read(&path)?;
        let report = match server.handle_request(&request, mime::SYNCML_XML) {
            Ok(response) => {
                if let Some(out) = out {
                    fs::write(out.join(format!("server_{number}.xml")), &response.body)?;
                }
                let summary = summarize(&response.body)?;
                info!(file = %file, statuses = summary.statuses.len(), "message replayed");
                MessageReport {
                    file,
                    response_bytes: Some(response.body.len()),
                    statuses: summary.statuses,
                    commands: summary.commands,
                    is_final: summary.is_final,
                    error: None,
                }
            }
            Err(e) => {
                warn!(file = %file, error = %e, "message rejected");
                MessageReport {
                    file,
                    response_bytes: None,
                    statuses: Vec::new(),
                    commands: Vec::new(),
                    is_final: false,
                    error: Some(e.to_string()),
                }
            }
        };
        messages.push(report);
    }

    Ok(ReplayReport {
        dir: dir.display().to_string(),
        messages,
        open_sessions: server.session_count()?,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Client message files with their number, sorted by number.
fn message_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("client_"))
            .and_then(|n| n.strip_suffix(".xml"))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(number) = number {
            files.push((number, path));
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Default)]
struct ResponseSummary {
    statuses: Vec<StatusLine>,
    commands: Vec<String>,
    is_final: bool,
}

/// Collects the top-level body commands of a response.
#[derive(Default)]
struct SummaryHandler {
    path: Vec<String>,
    text: String,
    cmd: Option<String>,
    code: Option<u16>,
    summary: ResponseSummary,
}

impl SummaryHandler {
    fn in_body(&self) -> bool {
        self.path.len() == 2 && self.path[1] == "SyncBody"
    }
}

impl ElementHandler for SummaryHandler {
    fn start_element(&mut self, _namespace: &str, name: &str) -> ProtocolResult<()> {
        if self.in_body() && name == "Status" {
            self.cmd = None;
            self.code = None;
        }
        self.path.push(name.to_string());
        self.text.clear();
        Ok(())
    }

    fn characters(&mut self, text: &str) -> ProtocolResult<()> {
        self.text.push_str(text);
        Ok(())
    }

    fn end_element(&mut self, _namespace: &str, name: &str) -> ProtocolResult<()> {
        let depth = self.path.len();
        if depth == 4 && self.path[2] == "Status" {
            match name {
                "Cmd" => self.cmd = Some(self.text.trim().to_string()),
                "Data" => self.code = StatusCode::parse(&self.text).map(StatusCode::as_u16),
                _ => {}
            }
        }
        self.path.pop();
        if self.in_body() {
            match name {
                "Status" => self.summary.statuses.push(StatusLine {
                    cmd: self.cmd.take().unwrap_or_default(),
                    code: self.code.take().unwrap_or_default(),
                }),
                "Final" => self.summary.is_final = true,
                other => self.summary.commands.push(other.to_string()),
            }
        }
        self.text.clear();
        Ok(())
    }
}

fn summarize(body: &[u8]) -> ProtocolResult<ResponseSummary> {
    let mut handler = SummaryHandler::default();
    XmlDecoder::new().decode(body, &mut handler)?;
    Ok(handler.summary)
}

fn print_text_output(report: &ReplayReport) {
    println!("Replay of {}", report.dir);
    println!("==========");
    for message in &report.messages {
        match (&message.error, message.response_bytes) {
            (Some(error), _) => println!("{}: rejected ({})", message.file, error),
            (None, Some(bytes)) => {
                let statuses: Vec<String> = message
                    .statuses
                    .iter()
                    .map(|s| format!("{}={}", s.cmd, s.code))
                    .collect();
                println!(
                    "{}: {} bytes{}",
                    message.file,
                    bytes,
                    if message.is_final { ", final" } else { "" }
                );
                println!("  Statuses: {}", statuses.join(" "));
                if !message.commands.is_empty() {
                    println!("  Commands: {}", message.commands.join(" "));
                }
            }
            (None, None) => println!("{}: no response", message.file),
        }
    }
    println!();
    println!("Open sessions: {}", report.open_sessions);
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_testkit::prelude::*;
    use tempfile::tempdir;

    fn write(dir: &Path, number: u32, message: &ClientMessage) {
        fs::write(dir.join(format!("client_{number}.xml")), message.build()).unwrap();
    }

    #[test]
    fn replays_a_recorded_session() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            1,
            &ClientMessage::new("1", 1)
                .basic_auth("alice", "secret")
                .put_devinf(&devinf("Acme", "X1"))
                .alert(201, "notes", None, "1"),
        );
        write(
            dir.path(),
            2,
            &ClientMessage::new("1", 2).sync(
                "notes",
                vec![ClientChange::add("n1", "text/plain", "milk")],
            ),
        );
        write(dir.path(), 3, &ClientMessage::new("1", 3));
        let out = dir.path().join("out");

        let report = replay(dir.path(), Some(("alice", "secret")), Some(&out)).unwrap();

        assert_eq!(report.messages.len(), 3);
        let first = &report.messages[0];
        assert_eq!(first.file, "client_1.xml");
        assert_eq!(
            first.statuses[0],
            StatusLine { cmd: "SyncHdr".into(), code: 212 }
        );
        assert!(first.statuses.contains(&StatusLine { cmd: "Alert".into(), code: 200 }));
        assert!(first.commands.contains(&"Alert".to_string()));
        assert!(first.is_final);

        let second = &report.messages[1];
        assert!(second.statuses.contains(&StatusLine { cmd: "Sync".into(), code: 200 }));
        assert!(second.statuses.contains(&StatusLine { cmd: "Add".into(), code: 201 }));
        assert!(second.commands.contains(&"Sync".to_string()));

        assert_eq!(report.open_sessions, 0);
        assert!(out.join("server_3.xml").exists());
    }

    #[test]
    fn files_are_replayed_in_numeric_order() {
        let dir = tempdir().unwrap();
        for number in [10, 2, 1] {
            fs::write(dir.path().join(format!("client_{number}.xml")), b"").unwrap();
        }
        fs::write(dir.path().join("server_1.xml"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let files: Vec<u32> = message_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(files, vec![1, 2, 10]);
    }

    #[test]
    fn rejected_messages_are_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("client_1.xml"), b"<SyncML><SyncHdr>").unwrap();
        let report = replay(dir.path(), None, None).unwrap();
        assert!(report.messages[0].error.is_some());
        assert!(report.messages[0].response_bytes.is_none());
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(replay(dir.path(), None, None).is_err());
    }
}
