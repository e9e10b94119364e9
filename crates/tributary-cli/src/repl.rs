//! Interactive shell for tributary
//!
//! Provides a rustyline-based shell with:
//! - Command history (up/down arrows), saved to ~/.tributary/history
//! - Backslash line continuation
//! - SQL statements terminated by `;`, possibly spanning several lines
//! - Ctrl+C to stop a running SELECT
//!
//! The same line handling drives non-interactive scripts.

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tributary_engine::{split_terminated, ClientSession, ResultStream, StatementResult};

use crate::config::{self, OutputFormat};
use crate::console::Console;

const PROMPT: &str = "tributary> ";
const CONTINUATION_PROMPT: &str = "         > ";

/// Shell commands handled without the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    Help,
    Version,
    Output(Option<String>),
    Clear,
    History,
    Server,
    Exit,
}

impl LocalCommand {
    /// Recognize a shell command; `None` means the line is SQL.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim().trim_end_matches(';').trim();
        let mut words = line.split_whitespace();
        let first = words.next()?.to_lowercase();
        let rest: Vec<&str> = words.collect();

        let command = match (first.as_str(), rest.as_slice()) {
            ("help", []) => LocalCommand::Help,
            ("version", []) => LocalCommand::Version,
            ("output", []) => LocalCommand::Output(None),
            ("output", [format]) => LocalCommand::Output(Some(format.to_string())),
            ("clear", []) => LocalCommand::Clear,
            ("history", []) => LocalCommand::History,
            ("server", []) => LocalCommand::Server,
            ("exit", []) | ("quit", []) => LocalCommand::Exit,
            _ => return None,
        };
        Some(command)
    }
}

/// Joins physical lines ending in `\` into one logical line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    /// Feed one physical line; returns the logical line once it is complete.
    /// Whitespace after the backslash is ignored.
    pub fn push(&mut self, line: &str) -> Option<String> {
        match line.trim_end().strip_suffix('\\') {
            Some(head) => {
                self.partial.push_str(head);
                None
            }
            None => {
                let mut logical = std::mem::take(&mut self.partial);
                logical.push_str(line);
                Some(logical)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

enum Flow {
    Continue,
    Exit,
}

/// Shell state: the session plus whatever input is still buffered.
pub struct Repl {
    session: ClientSession,
    console: Console,
    lines: LineBuffer,
    /// SQL text still waiting for its terminating `;`.
    pending: String,
    errors: usize,
}

impl Repl {
    pub fn new(session: ClientSession, console: Console) -> Self {
        Self {
            session,
            console,
            lines: LineBuffer::default(),
            pending: String::new(),
            errors: 0,
        }
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn into_session(self) -> ClientSession {
        self.session
    }

    /// Run the interactive loop until `exit` or Ctrl+D.
    pub async fn run_interactive(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new()?;

        // Load history from file if it exists
        let history_path = Self::history_path();
        if history_path.exists() {
            let _ = editor.load_history(&history_path);
        }

        println!("Tributary shell {}", env!("CARGO_PKG_VERSION"));
        self.print_server();
        println!("Type 'help' for available commands, 'exit' or Ctrl+D to quit");
        println!();

        loop {
            let prompt = if self.lines.is_empty() && self.pending.trim().is_empty() {
                PROMPT
            } else {
                CONTINUATION_PROMPT
            };
            match editor.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    if let Flow::Exit = self.handle_line(&line).await {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C drops whatever was being typed
                    println!("^C");
                    self.lines.clear();
                    self.pending.clear();
                }
                Err(ReadlineError::Eof) => {
                    println!("exit");
                    break;
                }
                Err(err) => {
                    eprintln!("Error reading line: {}", err);
                    break;
                }
            }
        }

        // Save history on exit
        if let Some(parent) = history_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        editor.save_history(&history_path)?;
        Ok(())
    }

    /// Run a script. Returns the number of failed statements.
    pub async fn run_script(&mut self, script: &str) -> usize {
        for line in script.lines() {
            if let Flow::Exit = self.handle_line(line).await {
                return self.errors;
            }
        }
        // An unterminated last statement still runs.
        if let Some(line) = self.lines.push("") {
            self.pending.push_str(&line);
        }
        let tail = std::mem::take(&mut self.pending);
        if !tail.trim().is_empty() {
            self.execute(tail.trim()).await;
        }
        self.errors
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        let Some(logical) = self.lines.push(line) else {
            return Flow::Continue;
        };

        if self.pending.trim().is_empty() {
            if let Some(command) = LocalCommand::parse(&logical) {
                return self.run_local(command);
            }
        }

        self.pending.push_str(&logical);
        self.pending.push('\n');
        let (statements, tail) = split_terminated(&self.pending);
        self.pending = if tail.trim().is_empty() {
            String::new()
        } else {
            tail
        };
        for statement in statements {
            self.execute(&statement).await;
        }
        Flow::Continue
    }

    fn run_local(&mut self, command: LocalCommand) -> Flow {
        match command {
            LocalCommand::Help => Self::print_help(),
            LocalCommand::Version => {
                println!("Version: {}", env!("CARGO_PKG_VERSION"));
                println!("Server version: {}", self.session.server_info().version);
            }
            LocalCommand::Output(None) => println!("Output format: {}", self.console.format()),
            LocalCommand::Output(Some(format)) => match format.parse::<OutputFormat>() {
                Ok(format) => {
                    self.console.set_format(format);
                    println!("Output format set to {}", format);
                }
                Err(e) => {
                    self.errors += 1;
                    eprintln!("{}", self.console.error(&e.to_string()));
                }
            },
            LocalCommand::Clear => print!("\x1B[2J\x1B[1;1H"),
            LocalCommand::History => {
                for (i, entry) in self.session.history().iter().enumerate() {
                    println!("{:>4}  {}", i + 1, entry.statement);
                }
            }
            LocalCommand::Server => self.print_server(),
            LocalCommand::Exit => return Flow::Exit,
        }
        Flow::Continue
    }

    async fn execute(&mut self, statement: &str) {
        match self.session.execute(statement).await {
            Ok(StatementResult::Streaming(stream)) => self.consume(stream).await,
            Ok(result) => match self.console.render(&result) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    self.errors += 1;
                    eprintln!("{}", self.console.error(&e.to_string()));
                }
            },
            Err(e) => {
                self.errors += 1;
                eprintln!("{}", self.console.error(&e.to_string()));
            }
        }
    }

    /// Print rows until the stream ends or Ctrl+C cancels it.
    async fn consume(&mut self, mut stream: ResultStream) {
        let header = self.console.render_header(stream.schema());
        if !header.is_empty() {
            println!("{}", header);
        }

        let cancel = stream.cancel_token();
        loop {
            tokio::select! {
                row = stream.next() => match row {
                    Some(row) => println!("{}", self.console.render_row(&row)),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => cancel.cancel(),
            }
        }

        if let Some(reason) = stream.end_reason() {
            if !reason.is_normal() {
                self.errors += 1;
            }
            println!("{}", self.console.render_end(reason));
        }
    }

    fn print_server(&self) {
        let info = self.session.server_info();
        println!(
            "Server: cluster '{}', service id '{}', version {}",
            info.cluster_id, info.service_id, info.version
        );
    }

    /// Get history file path
    fn history_path() -> PathBuf {
        config::home_dir().join("history")
    }

    /// Print help message
    fn print_help() {
        println!("Shell commands:");
        println!("    help                       Show this help message");
        println!("    version                    Show client and server versions");
        println!("    output [TABULAR|JSON]      Show or change the output format");
        println!("    clear                      Clear the screen");
        println!("    history                    List the statements run in this session");
        println!("    server                     Show the server this shell is attached to");
        println!("    exit/quit                  Exit the shell");
        println!();
        println!("SQL statements (end each with ';', continue a line with '\\'):");
        println!("    CREATE STREAM|TABLE name (col TYPE, ...) WITH (kafka_topic='t', value_format='json');");
        println!("    CREATE STREAM|TABLE name [WITH (...)] AS SELECT ...;");
        println!("    DROP STREAM|TABLE name;");
        println!("    TERMINATE query_id;");
        println!("    REGISTER TOPIC name WITH (kafka_topic='t', value_format='json');");
        println!("    DROP TOPIC name;");
        println!("    SELECT cols FROM source [WHERE ...] [LIMIT n];");
        println!("    LIST|SHOW STREAMS|TABLES|QUERIES|PROPERTIES|FUNCTIONS|REGISTERED TOPICS;");
        println!("    DESCRIBE name;  DESCRIBE FUNCTION name;  DESCRIBE TOPIC name;");
        println!("    SET 'property'='value';  UNSET 'property';");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tributary_core::Version;
    use tributary_engine::{InMemoryEngine, LocalEndpoint, Node, NodeConfig, ServerEndpoint};
    use tributary_log::InMemoryCommandLog;

    #[test]
    fn test_backslash_continuation() {
        let mut lines = LineBuffer::default();
        assert_eq!(lines.push("he\\"), None);
        assert_eq!(lines.push("lp").as_deref(), Some("help"));

        assert_eq!(lines.push("he\\   "), None);
        assert!(!lines.is_empty());
        assert_eq!(lines.push("lp").as_deref(), Some("help"));
        assert!(lines.is_empty());
    }

    #[test]
    fn test_local_commands() {
        assert_eq!(LocalCommand::parse("help"), Some(LocalCommand::Help));
        assert_eq!(LocalCommand::parse("  EXIT; "), Some(LocalCommand::Exit));
        assert_eq!(
            LocalCommand::parse("output json"),
            Some(LocalCommand::Output(Some("json".to_string())))
        );
        assert_eq!(LocalCommand::parse("output"), Some(LocalCommand::Output(None)));
        assert_eq!(LocalCommand::parse("LIST STREAMS;"), None);
        assert_eq!(LocalCommand::parse("help me"), None);
        assert_eq!(LocalCommand::parse(""), None);
    }

    async fn repl() -> Repl {
        let node = Node::start(
            NodeConfig::default(),
            Arc::new(InMemoryCommandLog::default()),
            Arc::new(InMemoryEngine::new()),
        )
        .await
        .unwrap();
        let endpoint: Arc<dyn ServerEndpoint> = Arc::new(LocalEndpoint::new(Arc::new(node)));
        let session = ClientSession::connect(endpoint, &Version::current(), None)
            .await
            .unwrap();
        Repl::new(session, Console::new(OutputFormat::Tabular, false))
    }

    #[tokio::test]
    async fn test_script_with_multiline_statement() {
        let mut repl = repl().await;
        let errors = repl
            .run_script(
                "CREATE STREAM ORDERS (ID VARCHAR,\n\
                 UNITS DOUBLE) WITH (kafka_topic='orders', value_format='json');\n\
                 LIST STREAMS; DESCRIBE ORDERS;\n\
                 LIST TABLES",
            )
            .await;
        assert_eq!(errors, 0);
        let statements: Vec<&str> = repl
            .session()
            .history()
            .iter()
            .map(|h| h.statement.as_str())
            .collect();
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("CREATE STREAM ORDERS"));
        assert_eq!(statements[3], "LIST TABLES");
    }

    #[tokio::test]
    async fn test_script_counts_errors_and_stops_at_exit() {
        let mut repl = repl().await;
        let errors = repl
            .run_script("DROP STREAM NOPE;\noutput yaml\nexit\nLIST STREAMS;")
            .await;
        assert_eq!(errors, 2);
        assert_eq!(repl.session().history().len(), 1);
    }

    #[tokio::test]
    async fn test_output_switch() {
        let mut repl = repl().await;
        repl.run_script("output json").await;
        assert_eq!(repl.console.format(), OutputFormat::Json);
    }
}
