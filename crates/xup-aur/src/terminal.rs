//! Running an interactive command inside an external terminal emulator.

use xup_core::Invocation;

/// Flag a known terminal expects before the command to execute.
///
/// Returns `Some("")` for terminals that take the command directly and
/// `None` when the terminal is unknown.
pub fn exec_flag(terminal: &str) -> Option<&'static str> {
    let name = std::path::Path::new(terminal)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(terminal);

    match name {
        "foot" | "alacritty" | "konsole" | "xterm" | "xfce4-terminal" | "wezterm" => Some("-e"),
        "kitty" => Some(""),
        "gnome-terminal" | "ptyxis" => Some("--"),
        _ => None,
    }
}

/// Wraps `command` so it runs inside `terminal`.
///
/// An explicit `flag` overrides the built-in table; unknown terminals
/// fall back to `-e`.
pub fn wrap(terminal: &str, flag: Option<&str>, command: &Invocation) -> Invocation {
    let flag = flag
        .or_else(|| exec_flag(terminal))
        .unwrap_or("-e");

    let mut wrapped = Invocation::new(terminal);
    if !flag.is_empty() {
        wrapped = wrapped.arg(flag);
    }
    wrapped = wrapped.arg(&command.program).args(command.args.iter().cloned());
    wrapped.timeout = command.timeout;
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_flags() {
        assert_eq!(exec_flag("foot"), Some("-e"));
        assert_eq!(exec_flag("/usr/bin/alacritty"), Some("-e"));
        assert_eq!(exec_flag("kitty"), Some(""));
        assert_eq!(exec_flag("gnome-terminal"), Some("--"));
        assert_eq!(exec_flag("mystery-term"), None);
    }

    #[test]
    fn test_wrap() {
        let yay = Invocation::new("/usr/bin/yay").arg("-Sua");
        assert_eq!(wrap("foot", None, &yay).display_name(), "foot -e /usr/bin/yay -Sua");
        assert_eq!(wrap("kitty", None, &yay).display_name(), "kitty /usr/bin/yay -Sua");
        assert_eq!(
            wrap("gnome-terminal", None, &yay).display_name(),
            "gnome-terminal -- /usr/bin/yay -Sua"
        );
        assert_eq!(
            wrap("mystery-term", Some("-x"), &yay).display_name(),
            "mystery-term -x /usr/bin/yay -Sua"
        );
        assert_eq!(
            wrap("mystery-term", None, &yay).display_name(),
            "mystery-term -e /usr/bin/yay -Sua"
        );
    }
}
