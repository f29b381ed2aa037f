/// Display text for comments
use crate::comment::models::CommentRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;

/// Produces the strings a comment list shows for each record
pub trait CommentPresenter: Send + Sync {
    /// Header line, e.g. `alice - 2016-03-04 05:06:07`
    fn head_text(&self, record: &CommentRecord) -> String;

    fn body_text(&self, record: &CommentRecord) -> String {
        record.content.clone()
    }

    fn head_tooltip(&self, _record: &CommentRecord) -> Option<String> {
        None
    }

    fn body_tooltip(&self, _record: &CommentRecord) -> Option<String> {
        None
    }
}

/// Presenter rendering `created` with a strftime format
#[derive(Debug, Clone)]
pub struct DefaultCommentPresenter {
    date_format: String,
}

impl DefaultCommentPresenter {
    pub fn new(date_format: impl Into<String>) -> Self {
        Self {
            date_format: date_format.into(),
        }
    }

    /// Format a timestamp, falling back to RFC 3339 if the format is unusable
    pub fn format_date(&self, date: &DateTime<Utc>) -> String {
        let mut out = String::new();
        match write!(out, "{}", date.format(&self.date_format)) {
            Ok(()) => out,
            Err(_) => date.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

impl CommentPresenter for DefaultCommentPresenter {
    fn head_text(&self, record: &CommentRecord) -> String {
        match &record.created {
            Some(created) => format!("{} - {}", record.author, self.format_date(created)),
            None => record.author.clone(),
        }
    }
}
