//! Transient notifications shown after an operation.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// One line of user feedback. Errors go to stderr, everything else to stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub detail: Option<String>,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
            detail: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            detail: None,
        }
    }

    /// `message` for the user, with the underlying error as detail.
    pub fn failure(message: impl Into<String>, error: &dyn fmt::Display) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            detail: Some(error.to_string()),
        }
    }

    pub fn show(&self) {
        match self.level {
            NoticeLevel::Error => eprintln!("{}", self),
            _ => println!("{}", self),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.level {
            NoticeLevel::Success => "✓",
            NoticeLevel::Info => "·",
            NoticeLevel::Error => "✗",
        };
        write!(f, "{} {}", marker, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_carries_detail() {
        let notice = Notice::failure("Failed to sign in", &"Invalid login credentials");
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.to_string(), "✗ Failed to sign in: Invalid login credentials");
    }

    #[test]
    fn test_success_has_no_detail() {
        assert_eq!(Notice::success("Signed out").to_string(), "✓ Signed out");
    }
}
