use anyhow::{bail, Result};
use unicode_normalization::UnicodeNormalization;

/// Destructive or privilege-escalating patterns that are always blocked,
/// allowlist or not.
const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=/dev",
    "> /dev/sd",
    "shutdown",
    "reboot",
    "sudo ",
    "su ",
    "doas ",
    "shred ",
    "wipefs",
    // Inline interpreters can smuggle arbitrary code past the allowlist
    "python -c",
    "python3 -c",
    "perl -e",
    "node -e",
    "ruby -e",
    // Reverse shells
    "nc -e",
    "ncat -e",
    "socat exec:",
];

/// Chaining and substitution metacharacters defeat first-token allowlisting.
const BLOCKED_METACHARS: &[&str] = &["$(", "`", "|", ";", "&&", "||"];

/// Validate a command line before it reaches `sh -c`.
pub fn validate_command(command: &str, allowlist: &Option<Vec<String>>) -> Result<()> {
    if command.trim().is_empty() {
        bail!("Empty command is not allowed");
    }

    // NFKC normalization closes the Unicode homoglyph bypass
    let command = command.nfkc().collect::<String>();

    if command
        .chars()
        .any(|c| matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}'))
    {
        bail!("Command contains an embedded line separator (potential injection)");
    }

    let lower = command.to_lowercase();

    for meta in BLOCKED_METACHARS {
        if lower.contains(meta) {
            bail!("Command contains blocked shell metacharacter: '{}'", meta);
        }
    }
    for pattern in BLOCKED_PATTERNS {
        if lower.contains(pattern) {
            bail!("Command contains blocked pattern: '{}'", pattern);
        }
    }

    if has_recursive_force_rm(&lower) {
        bail!("Command combines rm with both recursive and force flags");
    }

    // The first token is the executable; check it against the allowlist
    if let Some(allowed) = allowlist {
        let executable = command.split_whitespace().next().unwrap_or("");
        if !allowed.iter().any(|a| a == executable) {
            bail!(
                "Command '{}' is not in the allowlist. Allowed: {:?}",
                executable,
                allowed
            );
        }
    }

    Ok(())
}

/// Token-based detection of `rm` invoked with both -r and -f, in any order
/// and whether the flags are split or combined.
fn has_recursive_force_rm(lower: &str) -> bool {
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    let is_rm = tokens
        .first()
        .is_some_and(|t| *t == "rm" || t.ends_with("/rm"));
    if !is_rm {
        return false;
    }
    let short_flags = |t: &&&str| t.starts_with('-') && !t.starts_with("--");
    let recursive = tokens
        .iter()
        .filter(short_flags)
        .any(|t| t.contains('r'));
    let force = tokens.iter().filter(short_flags).any(|t| t.contains('f'));
    recursive && force
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_commands_pass() {
        assert!(validate_command("ls -la", &None).is_ok());
        assert!(validate_command("echo hello", &None).is_ok());
        assert!(validate_command("uname -a", &None).is_ok());
    }

    #[test]
    fn test_destructive_patterns_blocked() {
        assert!(validate_command("rm -rf /", &None).is_err());
        assert!(validate_command("mkfs.ext4 /dev/sda1", &None).is_err());
        assert!(validate_command("shutdown now", &None).is_err());
        assert!(validate_command("sudo id", &None).is_err());
    }

    #[test]
    fn test_chaining_and_substitution_blocked() {
        assert!(validate_command("echo ok; rm -rf /tmp", &None).is_err());
        assert!(validate_command("true && whoami", &None).is_err());
        assert!(validate_command("echo $(id)", &None).is_err());
        assert!(validate_command("echo `id`", &None).is_err());
        assert!(validate_command("cat /etc/passwd | sh", &None).is_err());
    }

    #[test]
    fn test_embedded_newlines_blocked() {
        assert!(validate_command("echo ok\nrm file", &None).is_err());
        assert!(validate_command("echo ok\u{2028}rm file", &None).is_err());
    }

    #[test]
    fn test_inline_interpreters_blocked() {
        assert!(validate_command("python3 -c 'print(1)'", &None).is_err());
        assert!(validate_command("node -e 'process.exit()'", &None).is_err());
    }

    #[test]
    fn test_rm_flag_combinations() {
        assert!(validate_command("rm -rf /tmp/stuff", &None).is_err());
        assert!(validate_command("rm -r -f /tmp/stuff", &None).is_err());
        assert!(validate_command("rm -f -r /tmp/stuff", &None).is_err());
        assert!(validate_command("/bin/rm -fr /tmp/stuff", &None).is_err());
        // A single flag stays permitted
        assert!(validate_command("rm -r /tmp/safe", &None).is_ok());
        assert!(validate_command("rm -f file.txt", &None).is_ok());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(validate_command("", &None).is_err());
        assert!(validate_command("   ", &None).is_err());
    }

    #[test]
    fn test_allowlist_checks_first_token() {
        let allow = Some(vec!["echo".to_string(), "ls".to_string()]);
        assert!(validate_command("echo hi", &allow).is_ok());
        assert!(validate_command("ls -la", &allow).is_ok());
        assert!(validate_command("cat file", &allow).is_err());
    }
}
