use crate::extractors::RejectionType;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use hub::{GroupId, SubjectId};
use log::*;

/// Header carrying the authenticated user id, set by the upstream authentication layer.
pub(crate) const SUBJECT_ID_HEADER: &str = "x-subject-id";
/// Optional comma separated organization ids of that user.
pub(crate) const GROUP_IDS_HEADER: &str = "x-group-ids";

/// The subject a connection acts for, as asserted by the trusted proxy in front of the hub.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct AuthenticatedSubject {
    pub(crate) subject_id: SubjectId,
    pub(crate) group_ids: Vec<GroupId>,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedSubject
where
    S: Send + Sync,
{
    type Rejection = RejectionType;

    // A missing subject means the request never passed authentication and is Unauthorized.
    // A subject or group list that does not parse is a Bad Request from the proxy.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

impl AuthenticatedSubject {
    fn from_headers(headers: &HeaderMap) -> Result<Self, RejectionType> {
        let subject_id = match headers.get(SUBJECT_ID_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|value| value.trim().parse::<SubjectId>().ok())
                .ok_or_else(|| {
                    warn!("Rejecting request with invalid {SUBJECT_ID_HEADER} header");
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Invalid {SUBJECT_ID_HEADER} header"),
                    )
                })?,
            None => return Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string())),
        };

        let group_ids = match headers.get(GROUP_IDS_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(parse_group_ids)
                .ok_or_else(|| {
                    warn!("Rejecting subject {subject_id} with invalid {GROUP_IDS_HEADER} header");
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Invalid {GROUP_IDS_HEADER} header"),
                    )
                })?,
            None => Vec::new(),
        };

        Ok(AuthenticatedSubject {
            subject_id,
            group_ids,
        })
    }
}

/// Parses "3, 4,5" into `[3, 4, 5]`, skipping empty entries. `None` if any entry is not an id.
fn parse_group_ids(value: &str) -> Option<Vec<GroupId>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse::<GroupId>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn subject_and_groups_are_parsed() {
        let subject = AuthenticatedSubject::from_headers(&headers(&[
            (SUBJECT_ID_HEADER, "7"),
            (GROUP_IDS_HEADER, "3, 4,,5"),
        ]))
        .unwrap();
        assert_eq!(
            subject,
            AuthenticatedSubject {
                subject_id: 7,
                group_ids: vec![3, 4, 5],
            }
        );
    }

    #[test]
    fn groups_are_optional() {
        let subject =
            AuthenticatedSubject::from_headers(&headers(&[(SUBJECT_ID_HEADER, "9")])).unwrap();
        assert!(subject.group_ids.is_empty());
    }

    #[test]
    fn missing_subject_is_unauthorized() {
        let (status, _) = AuthenticatedSubject::from_headers(&HeaderMap::new()).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let (status, _) =
            AuthenticatedSubject::from_headers(&headers(&[(SUBJECT_ID_HEADER, "seven")]))
                .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = AuthenticatedSubject::from_headers(&headers(&[
            (SUBJECT_ID_HEADER, "7"),
            (GROUP_IDS_HEADER, "3,x"),
        ]))
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
