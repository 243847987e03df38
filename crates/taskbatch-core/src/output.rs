use std::fs;
use std::io;
use std::path::Path;

pub const MAX_ECHO_LINES: usize = 5;
const HEAD_LINES: usize = 3;
const TAIL_LINES: usize = 2;

/// Console form of a command's stdout: anything longer than
/// `MAX_ECHO_LINES` keeps its first three and last two lines.
pub fn render_console(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= MAX_ECHO_LINES {
        return lines.join("\n");
    }
    let omitted = lines.len() - HEAD_LINES - TAIL_LINES;
    let mut rendered: Vec<String> = lines[..HEAD_LINES]
        .iter()
        .map(|line| line.to_string())
        .collect();
    rendered.push(format!("... ({omitted} lines omitted) ..."));
    rendered.extend(
        lines[lines.len() - TAIL_LINES..]
            .iter()
            .map(|line| line.to_string()),
    );
    rendered.join("\n")
}

/// Overwrite `path` with exactly `content`.
pub fn write_redirect(path: &Path, content: &str) -> io::Result<()> {
    fs::write(path, content)
}

pub fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_output_is_echoed_in_full() {
        assert_eq!(render_console("a\nb\nc\nd\ne\n"), "a\nb\nc\nd\ne");
        assert_eq!(render_console(""), "");
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let text = (1..=9).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        assert_eq!(
            render_console(&text),
            "line 1\nline 2\nline 3\n... (4 lines omitted) ...\nline 8\nline 9"
        );
    }

    #[test]
    fn six_lines_omit_one() {
        assert_eq!(
            render_console("1\n2\n3\n4\n5\n6"),
            "1\n2\n3\n... (1 lines omitted) ...\n5\n6"
        );
    }

    #[test]
    fn redirect_overwrites_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.txt");
        fs::write(&path, "old contents that are longer").expect("seed");
        write_redirect(&path, "new\n").expect("redirect");
        assert_eq!(fs::read_to_string(&path).expect("read"), "new\n");
    }

    #[test]
    fn redirect_to_missing_directory_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(write_redirect(&dir.path().join("nope").join("out.txt"), "x").is_err());
    }
}
