use std::convert::Infallible;

use serde::Serialize;
use warp::{
    http::{header, StatusCode},
    reply::Response,
    Rejection, Reply,
};

use crate::{
    database::error::{Error, HtmlError},
    export::Attachment,
};

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn error_reply(error: &Error) -> Response {
    if !error.is_client_error() {
        log::error!("{error}");
    }

    warp::reply::with_status(warp::reply::json(&error.body()), status(error.code)).into_response()
}

/// Serialises `Ok` values with `code`, errors with their own status.
pub fn into_reply<T: Serialize>(result: Result<T, Error>, code: StatusCode) -> Response {
    match result {
        Ok(value) => warp::reply::with_status(warp::reply::json(&value), code).into_response(),
        Err(e) => error_reply(&e),
    }
}

pub fn no_content(result: Result<(), Error>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_reply(&e),
    }
}

pub fn attachment_reply(attachment: Attachment) -> Response {
    let disposition = attachment.content_disposition();
    let reply = warp::reply::with_header(attachment.bytes, header::CONTENT_TYPE, attachment.content_type);
    warp::reply::with_header(reply, header::CONTENT_DISPOSITION, disposition).into_response()
}

/// Turns rejections, including the sdk's own `Error`, into JSON replies.
pub async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let error = if rejection.is_not_found() {
        HtmlError::NotFound.default()
    } else if let Some(error) = rejection.find::<Error>() {
        error.clone()
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        HtmlError::InvalidRequest.new("Method not allowed")
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        HtmlError::InvalidRequest.new(&format!("{e}"))
    } else if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
        HtmlError::InvalidRequest.new(&format!("{e}"))
    } else {
        HtmlError::Internal.new(&format!("Unhandled rejection: {rejection:?}"))
    };

    Ok(error_reply(&error))
}
