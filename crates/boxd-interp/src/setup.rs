//! Language-specific setup snippets for reconfiguring a context.

/// Snippet that changes the kernel's working directory, when the language
/// has a known idiom for it.
pub(crate) fn chdir_snippet(language: &str, cwd: &str) -> Option<String> {
    match language {
        "python" => Some(format!("import os\nos.chdir({})", py_str(cwd))),
        "javascript" | "node" => Some(format!("process.chdir({})", js_str(cwd))),
        _ => None,
    }
}

/// Snippet that sets one environment variable inside the kernel.
pub(crate) fn setenv_snippet(language: &str, key: &str, value: &str) -> Option<String> {
    match language {
        "python" => Some(format!(
            "import os\nos.environ[{}] = {}",
            py_str(key),
            py_str(value)
        )),
        "javascript" | "node" => Some(format!(
            "process.env[{}] = {}",
            js_str(key),
            js_str(value)
        )),
        _ => None,
    }
}

fn py_str(s: &str) -> String {
    format!("'{}'", s.replace('\\', r"\\").replace('\'', r"\'"))
}

fn js_str(s: &str) -> String {
    py_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_chdir_escapes_quotes() {
        let snippet = chdir_snippet("python", "/tmp/it's here").unwrap();
        assert!(snippet.contains(r"os.chdir('/tmp/it\'s here')"));
    }

    #[test]
    fn unknown_language_has_no_snippets() {
        assert!(chdir_snippet("fortran", "/x").is_none());
        assert!(setenv_snippet("fortran", "A", "B").is_none());
    }

    #[test]
    fn python_setenv_shape() {
        let snippet = setenv_snippet("python", "API_KEY", "secret").unwrap();
        assert!(snippet.contains("os.environ['API_KEY'] = 'secret'"));
    }
}
