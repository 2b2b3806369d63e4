use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Deserialize, Validate, ToSchema)]
pub struct LoginReqDto {
    #[validate(email(message = "Valid email is required"))]
    #[schema(example = "jane.doe@company.com")]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    /// email of the account
    pub sub: String,
    pub role: String,
    pub exp: usize,
    pub jti: String,

    pub token_type: TokenType,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}

/// `page`/`limit` query pair shared by every paginated listing.
#[derive(Debug, Deserialize, IntoParams)]
pub struct PageQuery {
    /// Page number, starting at 1
    pub page: Option<u64>,
    /// Items per page
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

impl Page {
    /// Rejects out-of-range values instead of clamping them, matching the
    /// 400 behaviour of the listing endpoints.
    pub fn parse(page: Option<u64>, limit: Option<u64>, max_limit: u64) -> Result<Self, crate::errors::AppError> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(10);
        if page < 1 {
            return Err(crate::errors::AppError::field("page", "page must be at least 1"));
        }
        if limit < 1 || limit > max_limit {
            return Err(crate::errors::AppError::field(
                "limit",
                &format!("limit must be between 1 and {max_limit}"),
            ));
        }
        let reachable = (page - 1)
            .checked_mul(limit)
            .is_some_and(|offset| offset <= i64::MAX as u64);
        if !reachable {
            return Err(crate::errors::AppError::field("page", "page is out of range"));
        }
        Ok(Self { page, limit })
    }

    /// Never overflows for a value built by `parse`.
    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.limit
    }

    pub fn pagination(&self, total_items: i64) -> Pagination {
        let total = total_items.max(0) as u64;
        Pagination {
            current_page: self.page,
            total_pages: total.div_ceil(self.limit),
            total_items: total,
            items_per_page: self.limit,
        }
    }
}

#[derive(Debug, Serialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[schema(example = 1)]
    pub current_page: u64,
    #[schema(example = 3)]
    pub total_pages: u64,
    #[schema(example = 25)]
    pub total_items: u64,
    #[schema(example = 10)]
    pub items_per_page: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_first_page_of_ten() {
        let page = Page::parse(None, None, 50).unwrap();
        assert_eq!(page, Page { page: 1, limit: 10 });
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn total_pages_round_up() {
        let page = Page::parse(Some(3), Some(10), 50).unwrap();
        assert_eq!(page.offset(), 20);
        let p = page.pagination(21);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.total_items, 21);
        assert_eq!(page.pagination(0).total_pages, 0);
    }

    #[test]
    fn limit_above_the_endpoint_cap_is_rejected() {
        assert!(Page::parse(Some(1), Some(51), 50).is_err());
        assert!(Page::parse(Some(0), Some(10), 50).is_err());
        assert!(Page::parse(Some(1), Some(200), 200).is_ok());
    }

    #[test]
    fn pages_past_any_reachable_offset_are_rejected() {
        let err = Page::parse(Some(u64::MAX), Some(50), 50).unwrap_err();
        match err {
            crate::errors::AppError::Validation(details) => assert_eq!(details[0].field, "page"),
            other => panic!("expected a page error, got {other}"),
        }

        let last = i64::MAX as u64 / 50 + 1;
        assert_eq!(Page::parse(Some(last), Some(50), 50).unwrap().offset(), (last - 1) * 50);
        assert!(Page::parse(Some(last + 1), Some(50), 50).is_err());
    }
}
