//! REPL slash commands and terminal rendering.

use mcpilot_core::SessionEvent;
use mcpilot_mcp::{
    PromptInfo, PromptResult, ResourceContents, ResourceInfo, ServerSummary, ToolInfo,
};
use mcpilot_types::truncate_str;
use std::collections::BTreeMap;
use std::io::Write;

/// A parsed REPL command.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Help,
    Clear,
    Tools,
    Resources,
    Prompts,
    Servers,
    Read(&'a str),
    Prompt {
        name: &'a str,
        arguments: BTreeMap<String, String>,
    },
    Quit,
    /// A command missing its argument, or with malformed ones.
    MissingArgument(&'static str),
    Unknown(&'a str),
}

/// Parse a line of input. Returns `None` for ordinary chat messages.
pub fn parse(input: &str) -> Option<Command<'_>> {
    if !input.starts_with('/') {
        return None;
    }

    let (cmd, arg) = match input.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (input, ""),
    };

    Some(match cmd {
        "/help" => Command::Help,
        "/clear" => Command::Clear,
        "/tools" => Command::Tools,
        "/resources" => Command::Resources,
        "/prompts" => Command::Prompts,
        "/servers" => Command::Servers,
        "/read" if arg.is_empty() => Command::MissingArgument("Usage: /read <uri>"),
        "/read" => Command::Read(arg),
        "/prompt" => parse_prompt(arg).unwrap_or(Command::MissingArgument(PROMPT_USAGE)),
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Unknown(cmd),
    })
}

const PROMPT_USAGE: &str = "Usage: /prompt <name> [key=value ...]";

/// `/prompt review code=main.rs style=terse`
fn parse_prompt(arg: &str) -> Option<Command<'_>> {
    let mut words = arg.split_whitespace();
    let name = words.next()?;
    let arguments = words
        .map(|pair| {
            pair.split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect::<Option<BTreeMap<_, _>>>()?;
    Some(Command::Prompt { name, arguments })
}

pub fn print_help() {
    eprintln!("Available commands:");
    eprintln!("  /help         Show this help");
    eprintln!("  /tools        List available tools");
    eprintln!("  /resources    List available resources");
    eprintln!("  /prompts      List available prompts");
    eprintln!("  /servers      Show connected tool servers");
    eprintln!("  /read <uri>   Print a resource's contents");
    eprintln!("  /prompt <name> [key=value ...]");
    eprintln!("                Render a server prompt");
    eprintln!("  /clear        Clear the conversation");
    eprintln!("  /quit         Exit");
}

pub fn print_tools(tools: &[ToolInfo]) {
    if tools.is_empty() {
        eprintln!("No tools available.");
        return;
    }
    for tool in tools {
        eprintln!("  {:<24} {}", tool.name, first_line(&tool.description));
    }
}

pub fn print_resources(resources: &[ResourceInfo]) {
    if resources.is_empty() {
        eprintln!("No resources available.");
        return;
    }
    for resource in resources {
        let mime = resource.mime_type.as_deref().unwrap_or("-");
        eprintln!("  {} ({}, {mime})", resource.uri, resource.name);
    }
}

pub fn print_prompts(prompts: &[PromptInfo]) {
    if prompts.is_empty() {
        eprintln!("No prompts available.");
        return;
    }
    for prompt in prompts {
        let args: Vec<String> = prompt
            .arguments
            .iter()
            .map(|a| {
                if a.required {
                    a.name.clone()
                } else {
                    format!("[{}]", a.name)
                }
            })
            .collect();
        eprintln!(
            "  {} {}  {}",
            prompt.name,
            args.join(" "),
            first_line(prompt.description.as_deref().unwrap_or(""))
        );
    }
}

pub fn print_servers(servers: &[ServerSummary]) {
    if servers.is_empty() {
        eprintln!("No tool servers connected.");
        return;
    }
    for s in servers {
        eprintln!(
            "  {:<20} {:<12} {} tools, {} resources, {} prompts",
            s.name,
            if s.alive { "connected" } else { "disconnected" },
            s.tools,
            s.resources,
            s.prompts
        );
    }
}

pub fn print_resource_contents(out: &mut impl Write, contents: &[ResourceContents]) {
    for item in contents {
        match (&item.text, &item.blob) {
            (Some(text), _) => {
                let _ = writeln!(out, "{text}");
            }
            (None, Some(blob)) => {
                let mime = item.mime_type.as_deref().unwrap_or("application/octet-stream");
                let _ = writeln!(out, "[binary content: {mime}, {} bytes base64]", blob.len());
            }
            (None, None) => {
                let _ = writeln!(out, "[empty resource: {}]", item.uri);
            }
        }
    }
}

pub fn print_prompt_result(out: &mut impl Write, result: &PromptResult) {
    if let Some(description) = result.description.as_deref().filter(|d| !d.trim().is_empty()) {
        let _ = writeln!(out, "# {}", description.trim());
    }
    for message in &result.messages {
        let _ = writeln!(out, "[{}] {}", message.role, message.content.as_str());
    }
}

/// Render one session event. Assistant text goes to `out`; status lines
/// go to `status`.
pub fn render_event(out: &mut impl Write, status: &mut impl Write, event: SessionEvent) {
    match event {
        SessionEvent::Message(message) => {
            if !message.content.trim().is_empty() {
                let _ = writeln!(out, "{}", message.content.trim());
                let _ = out.flush();
            }
        }
        SessionEvent::ThinkingStatus(text) => {
            let _ = writeln!(status, "\x1b[2m{text}\x1b[0m");
        }
        SessionEvent::ThinkingFinished => {}
        SessionEvent::ToolStart { name, arguments } => {
            let _ = writeln!(status, "  [tool: {name} {}]", truncate_str(&arguments, 120));
        }
        SessionEvent::ToolEnd {
            name,
            output,
            is_error,
        } => {
            if is_error {
                let _ = writeln!(status, "  [tool {name} error: {output}]");
            } else {
                let _ = writeln!(status, "  [tool {name} done: {output}]");
            }
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}
