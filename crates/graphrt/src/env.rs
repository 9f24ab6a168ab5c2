use std::env;
use std::sync::OnceLock;

static GRAPHRT_BACKEND: OnceLock<Option<String>> = OnceLock::new();
static GRAPHRT_INTRA_OP_THREADS: OnceLock<Option<u8>> = OnceLock::new();
static GRAPHRT_INTER_OP_THREADS: OnceLock<Option<u8>> = OnceLock::new();

fn parse_name(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_threads(value: &str) -> Option<u8> {
    value.trim().parse::<u8>().ok()
}

fn read<T>(key: &str, parse: fn(&str) -> Option<T>) -> Option<T> {
    env::var(key).ok().and_then(|value| parse(&value))
}

/// Backend name forced by `GRAPHRT_BACKEND`.
pub(crate) fn backend_override() -> Option<&'static str> {
    GRAPHRT_BACKEND
        .get_or_init(|| read("GRAPHRT_BACKEND", parse_name))
        .as_deref()
}

pub(crate) fn intra_op_threads_override() -> Option<u8> {
    *GRAPHRT_INTRA_OP_THREADS.get_or_init(|| read("GRAPHRT_INTRA_OP_THREADS", parse_threads))
}

pub(crate) fn inter_op_threads_override() -> Option<u8> {
    *GRAPHRT_INTER_OP_THREADS.get_or_init(|| read("GRAPHRT_INTER_OP_THREADS", parse_threads))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_are_ignored() {
        assert_eq!(parse_name("  "), None);
        assert_eq!(parse_name(" cpu "), Some("cpu".to_string()));
    }

    #[test]
    fn thread_counts_must_fit_u8() {
        assert_eq!(parse_threads("4"), Some(4));
        assert_eq!(parse_threads("300"), None);
        assert_eq!(parse_threads("many"), None);
    }
}
