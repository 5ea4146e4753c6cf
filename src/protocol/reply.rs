/// Textual answer to one request: a status line, optionally followed by raw
/// bytes for inline downloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Ok(Option<String>),
    OkWithBody { summary: String, body: Vec<u8> },
    Err(String),
}

impl Reply {
    pub fn ok() -> Self {
        Self::Ok(None)
    }

    pub fn ok_with(detail: impl Into<String>) -> Self {
        Self::Ok(Some(detail.into()))
    }

    pub fn err(reason: impl Into<String>) -> Self {
        Self::Err(reason.into())
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Err(_))
    }

    pub fn status_line(&self) -> String {
        match self {
            Self::Ok(None) => "OK\n".to_owned(),
            Self::Ok(Some(detail)) if detail.is_empty() => "OK\n".to_owned(),
            Self::Ok(Some(detail)) => format!("OK {detail}\n"),
            Self::OkWithBody { summary, .. } => format!("OK {summary}\n"),
            Self::Err(reason) => format!("ERR {reason}\n"),
        }
    }

    pub fn body(&self) -> Option<&[u8]> {
        match self {
            Self::OkWithBody { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Reply;

    #[test]
    fn status_lines_are_newline_terminated() {
        assert_eq!(Reply::ok().status_line(), "OK\n");
        assert_eq!(Reply::ok_with("").status_line(), "OK\n");
        assert_eq!(Reply::ok_with("a.txt b.txt").status_line(), "OK a.txt b.txt\n");
        assert_eq!(Reply::err("not found").status_line(), "ERR not found\n");
    }

    #[test]
    fn only_inline_downloads_carry_a_body() {
        let reply = Reply::OkWithBody {
            summary: "3".to_owned(),
            body: b"abc".to_vec(),
        };
        assert_eq!(reply.status_line(), "OK 3\n");
        assert_eq!(reply.body(), Some(&b"abc"[..]));
        assert!(reply.is_ok());
        assert_eq!(Reply::ok().body(), None);
        assert!(!Reply::err("x").is_ok());
    }
}
