use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::{collections::HashMap, env};

/// Captured result of one backend command run.
#[derive(Debug)]
pub struct Captured {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

fn expand_cmdline_env(cmdline: &str) -> String {
    // Expand ${VAR} from environment; special-case ${APP_BIN}
    // -> CHI_FORMS_APP_BIN (quoted if contains whitespace) or default "example-app"
    let re = match Regex::new(r"\$\{([A-Z0-9_]+)\}") {
        Ok(re) => re,
        Err(_) => return cmdline.to_string(),
    };
    let env_map: HashMap<String, String> = env::vars().collect();
    re.replace_all(cmdline, |caps: &regex::Captures| {
        let key = &caps[1];
        if key == "APP_BIN" {
            if let Some(v) = env_map.get("CHI_FORMS_APP_BIN") {
                // Quote if contains whitespace to keep it a single arg in shlex::split
                if v.chars().any(|c| c.is_whitespace()) {
                    let escaped = v.replace('"', "\\\"");
                    return format!("\"{escaped}\"");
                }
                return v.to_string();
            }
            return "example-app".to_string();
        }
        env_map.get(key).cloned().unwrap_or_default()
    })
    .to_string()
}

/// Split a configured command line and append extra arguments verbatim.
pub fn build_argv(cmdline: &str, extra: &[&str]) -> Result<Vec<String>> {
    let expanded = expand_cmdline_env(cmdline);
    let mut parts =
        shlex::split(&expanded).ok_or_else(|| anyhow!("Failed to parse command line"))?;
    if parts.is_empty() {
        return Err(anyhow!("Empty command line"));
    }
    parts.extend(extra.iter().map(|s| s.to_string()));
    Ok(parts)
}

/// Run a backend command, optionally feeding `input` on stdin, and capture both streams.
pub fn run_capture(argv: &[String], input: Option<&str>) -> Result<Captured> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("Empty command line"))?;
    let mut child = Command::new(program)
        .args(args)
        .env("CHI_FORMS_JSON", "1")
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning {}", argv.join(" ")))?;
    // Feed stdin from its own thread while the output pipes drain.
    let output = thread::scope(|scope| -> Result<std::process::Output> {
        let writer = match (input, child.stdin.take()) {
            (Some(text), Some(mut stdin)) => {
                Some(scope.spawn(move || stdin.write_all(text.as_bytes())))
            }
            _ => None,
        };
        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for {program}"))?;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The backend may exit without reading everything
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e).context("writing request to stdin"),
                Err(_) => return Err(anyhow!("stdin writer panicked")),
            }
        }
        Ok(output)
    })?;
    Ok(Captured {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
