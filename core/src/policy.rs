//! Command denylist. This is a fixed policy, independent of workspace
//! content: destructive, privilege-escalating and shell-spawning
//! executables are refused by name, and a set of patterns catches
//! dangerous invocations of otherwise ordinary commands. The check runs
//! before anything is spawned.

use std::sync::LazyLock;

use regex_lite::Regex;

/// Executables refused by basename, extension-stripped and
/// case-insensitive.
const DENIED_PROGRAMS: &[&str] = &[
    // Destructive.
    "rm", "rmdir", "dd", "mkfs", "fdisk", "shred", "format",
    // Privilege escalation and account manipulation.
    "sudo", "su", "doas", "passwd", "chown", "chgrp", "chmod", "setfacl",
    // System state.
    "shutdown", "reboot", "halt", "poweroff", "init", "systemctl",
    // Shell spawning defeats argv-level policy checks.
    "bash", "sh", "zsh", "fish", "dash", "ksh", "csh", "tcsh", "pwsh", "powershell", "cmd",
    // Process control against arbitrary pids.
    "kill", "killall", "pkill",
];

/// Patterns matched against the whole joined command line.
#[allow(clippy::expect_used)]
static DENIED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Recursive force-delete, any argument order or combined flags.
        r"(^|\s)rm\s+(-[a-zA-Z]*[rR][a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*[rR])",
        // Raw octal chmod.
        r"(^|\s)chmod\s+[0-7]{3,4}(\s|$)",
        // Disk-image writes.
        r"(^|\s)dd\s+.*of=/dev/",
        r">\s*/dev/(sd|nvme|disk)",
        // Privilege escalation embedded later in the line.
        r"(^|\s)(sudo|doas|su)(\s|$)",
        // Flags that disable other tools' sandboxes.
        r"--no-sandbox",
        r"--dangerously-skip-permissions",
        r"--disable-seccomp",
        // Credential files.
        r"/etc/(shadow|passwd|sudoers)",
        r"(^|[\s/])\.ssh(/|\s|$)",
        r"(^|[\s/])\.aws(/|\s|$)",
        r"(^|[\s/])\.gnupg(/|\s|$)",
        r"id_rsa|id_ed25519",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("denylist pattern must compile"))
    .collect()
});

/// Returns the reason a command is denied, or `None` if policy permits it.
pub fn deny_reason(command: &[String]) -> Option<String> {
    let Some(program) = command.first() else {
        return Some("empty command".to_string());
    };

    let basename = program_basename(program);
    if DENIED_PROGRAMS.contains(&basename.as_str()) {
        return Some(format!("command '{basename}' is not permitted"));
    }

    let joined = command.join(" ");
    if DENIED_PATTERNS.iter().any(|re| re.is_match(&joined)) {
        return Some(format!("command matches a denied pattern: {joined}"));
    }

    None
}

/// Basename of the executable, lowercased, with a trailing extension
/// stripped so `RM.EXE` and `rm` are the same program.
fn program_basename(program: &str) -> String {
    let base = program
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(program)
        .to_ascii_lowercase();
    match base.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn destructive_commands_are_denied() {
        assert!(deny_reason(&cmd(&["rm", "-rf", "/"])).is_some());
        assert!(deny_reason(&cmd(&["sudo", "ls"])).is_some());
        assert!(deny_reason(&cmd(&["chmod", "777", "x"])).is_some());
        assert!(deny_reason(&cmd(&["dd", "if=/dev/zero", "of=/dev/sda"])).is_some());
    }

    #[test]
    fn benign_commands_pass() {
        assert!(deny_reason(&cmd(&["git", "status"])).is_none());
        assert!(deny_reason(&cmd(&["echo", "hello"])).is_none());
        assert!(deny_reason(&cmd(&["cargo", "check"])).is_none());
        assert!(deny_reason(&cmd(&["ls", "-la"])).is_none());
    }

    #[test]
    fn empty_command_is_denied() {
        assert_eq!(deny_reason(&[]), Some("empty command".to_string()));
    }

    #[test]
    fn basename_and_extension_tricks_are_seen_through() {
        assert!(deny_reason(&cmd(&["/usr/bin/sudo", "ls"])).is_some());
        assert!(deny_reason(&cmd(&["RM.EXE", "x"])).is_some());
        assert!(deny_reason(&cmd(&["C:\\Windows\\System32\\cmd.exe", "/c", "dir"])).is_some());
    }

    #[test]
    fn shells_are_denied() {
        assert!(deny_reason(&cmd(&["bash", "-lc", "echo hi"])).is_some());
        assert!(deny_reason(&cmd(&["sh", "-c", "true"])).is_some());
    }

    #[test]
    fn credential_files_are_denied_by_pattern() {
        assert!(deny_reason(&cmd(&["cat", "/etc/shadow"])).is_some());
        assert!(deny_reason(&cmd(&["cat", "/home/user/.ssh/id_rsa"])).is_some());
    }

    #[test]
    fn sandbox_disabling_flags_are_denied() {
        assert!(deny_reason(&cmd(&["chromium", "--no-sandbox"])).is_some());
    }

    #[test]
    fn octal_chmod_pattern_does_not_hit_unrelated_numbers() {
        assert!(deny_reason(&cmd(&["head", "-c", "777", "file"])).is_none());
    }
}
