//! Terminal 能力：白名单命令，禁止危险操作
//!
//! 仅允许配置中的命令名（首词，如 ls、grep、date）；拒绝 shell 元字符与 find 的执行类参数。
//! 不经过 shell：按空白切分后直接执行程序，带超时与 tracing 审计。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::schema::{CapabilityDescriptor, FieldSpec, ParamSpec, ParamType};
use crate::tools::{CapabilityInput, CapabilityOutput, CapabilityProvider};

/// 即使命令名在白名单中也不允许出现的子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:",
];

/// shell 元字符：命令不经过 shell，出现即拒绝
const SHELL_META: &[char] = &[
    ';', '&', '|', '$', '`', '<', '>', '\n', '\r', '\\', '\'', '"', '(', ')',
];

/// 能执行或删除任意文件的参数（find 等）
const FORBIDDEN_ARGS: &[&str] = &[
    "-exec", "-execdir", "-ok", "-okdir", "-delete", "-fprint", "-fprintf", "-fls",
];

pub struct TerminalProvider {
    descriptor: CapabilityDescriptor,
    allowed_commands: HashSet<String>,
    timeout_secs: u64,
}

impl TerminalProvider {
    pub fn new(allowed_commands: Vec<String>, timeout_secs: u64) -> Self {
        let allowed: Vec<String> = allowed_commands.into_iter().map(|s| s.to_lowercase()).collect();
        let description = format!(
            "Executes a single command (no shell pipes or redirection) and returns its output. \
             Allowed commands: {}.",
            allowed.join(", ")
        );
        Self {
            descriptor: CapabilityDescriptor::new("Terminal", description)
                .input(ParamSpec::required("command", ParamType::String, "The command to execute"))
                .output(FieldSpec::new("output", ParamType::String, "The output of the command")),
            allowed_commands: allowed.into_iter().collect(),
            timeout_secs,
        }
    }

    /// 校验并切分命令，返回（程序名，参数）
    fn check_allowed(&self, raw: &str) -> Result<(String, Vec<String>), String> {
        let lower = raw.to_lowercase();
        if let Some(f) = FORBIDDEN_SUBSTR.iter().find(|f| lower.contains(*f)) {
            return Err(format!("Forbidden pattern: {}", f));
        }
        if let Some(c) = raw.chars().find(|c| SHELL_META.contains(c)) {
            return Err(format!("Shell metacharacter not allowed: {:?}", c));
        }
        let mut words = raw.split_whitespace();
        let name = words.next().unwrap_or("").to_lowercase();
        if name.is_empty() {
            return Err("Empty command".to_string());
        }
        if !self.allowed_commands.contains(&name) {
            return Err(format!("Command '{}' not in allowlist", name));
        }
        let args: Vec<String> = words.map(String::from).collect();
        if let Some(a) = args.iter().find(|a| FORBIDDEN_ARGS.contains(&a.to_lowercase().as_str())) {
            return Err(format!("Argument '{}' not allowed", a));
        }
        Ok((name, args))
    }
}

#[async_trait]
impl CapabilityProvider for TerminalProvider {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: CapabilityInput) -> Result<CapabilityOutput, String> {
        let command = input
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        let (program, args) = self.check_allowed(&command)?;

        tracing::info!(command = %command, "terminal execute");

        let mut cmd = Command::new(&program);
        cmd.args(&args).kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {}s", self.timeout_secs))?
            .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(format!("Exit {:?}\nstderr: {}", output.status, stderr.trim()));
        }
        let text = if stderr.is_empty() {
            stdout
        } else {
            format!("{}\nstderr: {}", stdout.trim(), stderr.trim())
        };
        let mut out = CapabilityOutput::new();
        out.insert("output".into(), Value::String(text));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal() -> TerminalProvider {
        TerminalProvider::new(vec!["echo".into(), "ls".into()], 5)
    }

    #[test]
    fn test_allowlist() {
        let t = terminal();
        assert!(t.check_allowed("echo hello").is_ok());
        assert!(t.check_allowed("LS -la").is_ok());
        assert!(t.check_allowed("cat /etc/passwd").is_err());
        assert!(t.check_allowed("").is_err());
        assert!(t.check_allowed("ls; rm -rf /").unwrap_err().contains("rm -rf"));
    }

    #[test]
    fn test_command_chaining_rejected() {
        let t = terminal();
        for raw in [
            "echo ok; id",
            "echo ok && id",
            "echo ok | id",
            "echo $(id)",
            "echo `id`",
            "echo ok > out.txt",
            "echo ok\nid",
        ] {
            assert!(
                t.check_allowed(raw).unwrap_err().contains("metacharacter"),
                "accepted: {raw}"
            );
        }
    }

    #[test]
    fn test_find_exec_rejected() {
        let t = TerminalProvider::new(vec!["find".into()], 5);
        assert!(t.check_allowed("find . -name x -exec id +").is_err());
        assert!(t.check_allowed("find . -DELETE").is_err());
        let (program, args) = t.check_allowed("FIND . -name x").unwrap();
        assert_eq!(program, "find");
        assert_eq!(args, vec![".", "-name", "x"]);
    }

    #[tokio::test]
    async fn test_chained_command_never_runs() {
        let mut input = CapabilityInput::new();
        input.insert("command".into(), Value::String("echo ok; id -un".into()));
        let err = terminal().run(input).await.unwrap_err();
        assert!(err.contains("metacharacter"));
    }

    #[test]
    fn test_description_lists_commands() {
        assert!(terminal().descriptor().description.contains("echo, ls"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_allowed_command() {
        let mut input = CapabilityInput::new();
        input.insert("command".into(), Value::String("echo scout".into()));
        let out = terminal().run(input).await.unwrap();
        assert_eq!(out["output"].as_str().map(str::trim), Some("scout"));
    }
}
