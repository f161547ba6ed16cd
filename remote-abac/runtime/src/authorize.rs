use crate::review::{ReviewResponse, SubjectAccessReview};
use bytes::Bytes;
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use remote_abac_core::{Authorizer, Engine};
use std::convert::Infallible;
use tracing::{debug, info, trace, warn};

pub const AUTHORIZE_PATH: &str = "/authorize";

/// Serves authorization decisions for `SubjectAccessReview`s posted to [`AUTHORIZE_PATH`].
///
/// Requests that can't be decoded, and responses that can't be encoded, are answered with an empty
/// `204 No Content`.
pub struct Authorize<E> {
    authorizer: Authorizer<E>,
}

type Body = http_body_util::Full<Bytes>;

// === impl Authorize ===

impl<E> Clone for Authorize<E> {
    fn clone(&self) -> Self {
        Self {
            authorizer: self.authorizer.clone(),
        }
    }
}

impl<E: Engine> Authorize<E> {
    pub fn new(authorizer: Authorizer<E>) -> Self {
        Self { authorizer }
    }

    fn review(&self, review: SubjectAccessReview) -> Response<Body> {
        let attrs = review.spec.to_attributes();
        debug!(?attrs);

        let decision = self.authorizer.decide(&attrs);
        match decision.reason() {
            None => info!(user = %attrs.user, verb = %attrs.verb, "Allowed"),
            Some(reason) => info!(user = %attrs.user, verb = %attrs.verb, %reason, "Denied"),
        }

        let rsp = ReviewResponse::new(review, decision);
        match serde_json::to_vec(&rsp) {
            Ok(bytes) => Response::builder()
                .status(http::StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(bytes))
                .expect("review response must be valid"),
            Err(error) => {
                warn!(%error, "Failed to encode response");
                empty(http::StatusCode::NO_CONTENT)
            }
        }
    }
}

impl<E, B> tower::Service<Request<B>> for Authorize<E>
where
    E: Engine,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), uri = %req.uri());
        if req.uri().path() != AUTHORIZE_PATH {
            return Box::pin(future::ok(empty(http::StatusCode::NOT_FOUND)));
        }
        if req.method() != http::Method::POST {
            return Box::pin(future::ok(empty(http::StatusCode::METHOD_NOT_ALLOWED)));
        }

        let authorize = self.clone();
        Box::pin(async move {
            let bytes = match req.into_body().collect().await {
                Ok(body) => body.to_bytes(),
                Err(error) => {
                    warn!(%error, "Failed to read request body");
                    return Ok(empty(http::StatusCode::NO_CONTENT));
                }
            };

            let review = match serde_json::from_slice::<SubjectAccessReview>(&bytes) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return Ok(empty(http::StatusCode::NO_CONTENT));
                }
            };
            trace!(?review);

            Ok(authorize.review(review))
        })
    }
}

fn empty(status: http::StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::default())
        .expect("empty response must be valid")
}
