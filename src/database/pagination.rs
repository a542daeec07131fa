use serde::{Deserialize, Serialize};

use crate::constants::MAX_PAGE_SIZE;

use super::error::{Error, HtmlError};

/// `?page=&limit=` query parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub limit: i64,
    pub offset: i64,
}

impl PageParams {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    pub fn window(&self, default_size: i64) -> Result<PageWindow, Error> {
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(HtmlError::NotFound.new("Invalid page"));
        }

        let limit = self
            .limit
            .filter(|limit| *limit > 0)
            .unwrap_or(default_size)
            .min(MAX_PAGE_SIZE);

        let offset = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| HtmlError::NotFound.new("Invalid page"))?;

        Ok(PageWindow {
            page,
            limit,
            offset,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PageContext<T> {
    pub count: i64,
    pub next: Option<i64>,
    pub previous: Option<i64>,
    pub results: Vec<T>,
}

impl<T> PageContext<T> {
    /// Pages past the last row are not found; an empty first page is not.
    pub fn from_rows(rows: Vec<T>, total_rows: i64, window: PageWindow) -> Result<Self, Error> {
        if rows.is_empty() {
            return match window.page {
                1 => Ok(Self::no_rows()),
                _ => Err(HtmlError::NotFound.new("Invalid page")),
            };
        }

        let next = if window.offset + window.limit < total_rows {
            Some(window.page + 1)
        } else {
            None
        };
        let previous = if window.page > 1 {
            Some(window.page - 1)
        } else {
            None
        };

        Ok(Self {
            count: total_rows,
            next,
            previous,
            results: rows,
        })
    }

    pub fn no_rows() -> Self {
        Self {
            count: 0,
            next: None,
            previous: None,
            results: vec![],
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageContext<U> {
        PageContext {
            count: self.count,
            next: self.next,
            previous: self.previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}
