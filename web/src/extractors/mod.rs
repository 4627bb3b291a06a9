pub(crate) mod authenticated_subject;

use axum::http::StatusCode;

type RejectionType = (StatusCode, String);
