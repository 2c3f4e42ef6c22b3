//! Redirect classification and derivation of the next hop's request.

use http::StatusCode;
use url::Url;

use crate::constants::{HTTP, HTTPS};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;

/// Headers that carry credentials for the original origin only
const ORIGIN_CREDENTIALS: [&str; 2] = ["authorization", "cookie"];

/// Check whether `status` asks the client to look elsewhere
pub fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MULTIPLE_CHOICES
            | StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// A response the engine may follow: redirect status with a `Location`
pub fn is_followable(response: &Response) -> bool {
    is_redirect_status(response.status()) && response.location().is_some()
}

/// Method for the next hop and whether the body travels with it
///
/// 303 always switches to GET (HEAD stays HEAD). 301 and 302 switch POST to
/// GET and keep every other method. 307 and 308 keep method and body.
pub fn redirect_method(status: StatusCode, method: Method) -> (Method, bool) {
    match status {
        StatusCode::SEE_OTHER if method == Method::Head => (Method::Head, false),
        StatusCode::SEE_OTHER => (Method::Get, false),
        StatusCode::MULTIPLE_CHOICES | StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND
            if method == Method::Post =>
        {
            (Method::Get, false)
        }
        _ => (method, true),
    }
}

/// Resolve `location` against the URL that produced it
///
/// A fragment on the original URL carries over when the target has none.
pub fn resolve_location(base: &Url, location: &str) -> Option<Url> {
    let mut target = base.join(location.trim()).ok()?;
    if target.scheme() != HTTP && target.scheme() != HTTPS {
        return None;
    }
    if target.fragment().is_none() {
        target.set_fragment(base.fragment());
    }
    Some(target)
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Request for the hop that follows `response`, or `None` to stop here
///
/// `previous` is the request that produced `response`. A body that has to be
/// replayed but cannot be rewound stops the chain.
pub async fn next_request(previous: &Request, response: &Response) -> Option<Request> {
    if !is_redirect_status(response.status()) {
        return None;
    }
    let location = response.location()?;
    let target = match resolve_location(previous.url(), location) {
        Some(target) => target,
        None => {
            tracing::debug!(location, "redirect target is not an http(s) URL");
            return None;
        }
    };

    let (method, keep_body) = redirect_method(response.status(), previous.method());
    let mut next = match previous.redirected(target) {
        Ok(next) => next.with_method(method),
        Err(e) => {
            tracing::debug!(error = %e, "redirect target rejected");
            return None;
        }
    };

    if !keep_body {
        next = next.without_body();
    } else if let Some(body) = next.body() {
        if !body.rewind().await {
            tracing::debug!(
                status = response.status().as_u16(),
                "request body cannot be replayed, not following redirect"
            );
            return None;
        }
    }

    if !same_origin(previous.url(), next.url()) {
        for name in ORIGIN_CREDENTIALS {
            next.headers_mut().remove(name);
        }
    }

    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{ByteSource, ReaderSource};

    fn redirect(status: StatusCode, location: &str) -> Response {
        Response::builder(status, Url::parse("http://example.test/a").unwrap())
            .header("Location", location)
            .build()
    }

    #[test]
    fn test_redirect_statuses() {
        for code in [300, 301, 302, 303, 307, 308] {
            assert!(is_redirect_status(StatusCode::from_u16(code).unwrap()), "{}", code);
        }
        for code in [200, 304, 305, 306, 400] {
            assert!(!is_redirect_status(StatusCode::from_u16(code).unwrap()), "{}", code);
        }
    }

    #[test]
    fn test_redirect_without_location_is_not_followable() {
        let response = Response::builder(StatusCode::FOUND, Url::parse("http://example.test/").unwrap()).build();
        assert!(!is_followable(&response));
        assert!(is_followable(&redirect(StatusCode::FOUND, "/b")));
    }

    #[test]
    fn test_method_conversion_table() {
        use Method::*;
        let see_other = StatusCode::SEE_OTHER;
        assert_eq!(redirect_method(see_other, Post), (Get, false));
        assert_eq!(redirect_method(see_other, Put), (Get, false));
        assert_eq!(redirect_method(see_other, Head), (Head, false));

        assert_eq!(redirect_method(StatusCode::MOVED_PERMANENTLY, Post), (Get, false));
        assert_eq!(redirect_method(StatusCode::FOUND, Post), (Get, false));
        assert_eq!(redirect_method(StatusCode::FOUND, Put), (Put, true));
        assert_eq!(redirect_method(StatusCode::FOUND, Get), (Get, true));

        assert_eq!(redirect_method(StatusCode::TEMPORARY_REDIRECT, Post), (Post, true));
        assert_eq!(redirect_method(StatusCode::PERMANENT_REDIRECT, Delete), (Delete, true));
    }

    #[test]
    fn test_resolve_location() {
        let base = Url::parse("http://example.test/dir/page?q=1#top").unwrap();
        assert_eq!(
            resolve_location(&base, "other").unwrap().as_str(),
            "http://example.test/dir/other#top"
        );
        assert_eq!(
            resolve_location(&base, "https://secure.test/x#frag").unwrap().as_str(),
            "https://secure.test/x#frag"
        );
        assert_eq!(
            resolve_location(&base, "//cdn.test/y").unwrap().as_str(),
            "http://cdn.test/y#top"
        );
        assert!(resolve_location(&base, "ftp://files.test/z").is_none());
    }

    #[tokio::test]
    async fn test_next_request_recomputes_host() {
        let previous = Request::get("http://example.test/a").unwrap();
        let next = next_request(&previous, &redirect(StatusCode::MOVED_PERMANENTLY, "http://other.test:8080/b"))
            .await
            .unwrap();
        assert_eq!(next.url().as_str(), "http://other.test:8080/b");
        assert_eq!(next.header("host"), Some("other.test:8080"));
        assert_eq!(next.method(), Method::Get);
    }

    #[tokio::test]
    async fn test_post_to_see_other_drops_body() {
        let previous = Request::post("http://example.test/a")
            .unwrap()
            .text("payload");
        let next = next_request(&previous, &redirect(StatusCode::SEE_OTHER, "/done"))
            .await
            .unwrap();
        assert_eq!(next.method(), Method::Get);
        assert!(next.body().is_none());
        assert!(next.header("content-type").is_none());
        assert!(next.header("content-length").is_none());
    }

    #[tokio::test]
    async fn test_temporary_redirect_replays_rewound_body() {
        let previous = Request::post("http://example.test/a")
            .unwrap()
            .text("payload");
        let body = previous.body().unwrap().clone();
        assert_eq!(body.read(3).await.unwrap(), b"pay");

        let next = next_request(&previous, &redirect(StatusCode::TEMPORARY_REDIRECT, "/b"))
            .await
            .unwrap();
        assert_eq!(next.method(), Method::Post);
        let replay = next.body().unwrap().read(64).await.unwrap();
        assert_eq!(replay, b"payload");
    }

    #[tokio::test]
    async fn test_unrewindable_body_stops_redirect() {
        let reader = ReaderSource::new(std::io::Cursor::new(b"stream".to_vec()));
        let previous = Request::post("http://example.test/a")
            .unwrap()
            .with_body(reader);
        let next = next_request(&previous, &redirect(StatusCode::PERMANENT_REDIRECT, "/b")).await;
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_credentials_stripped_across_origins() {
        let previous = Request::get("http://example.test/a")
            .unwrap()
            .with_header("Authorization", "Bearer t")
            .with_header("Cookie", "s=1")
            .with_header("X-Trace", "abc");

        let same = next_request(&previous, &redirect(StatusCode::FOUND, "/b")).await.unwrap();
        assert_eq!(same.header("authorization"), Some("Bearer t"));

        let other = next_request(&previous, &redirect(StatusCode::FOUND, "http://evil.test/"))
            .await
            .unwrap();
        assert!(other.header("authorization").is_none());
        assert!(other.header("cookie").is_none());
        assert_eq!(other.header("x-trace"), Some("abc"));
    }

    #[tokio::test]
    async fn test_non_http_location_is_not_followed() {
        let previous = Request::get("http://example.test/a").unwrap();
        assert!(next_request(&previous, &redirect(StatusCode::FOUND, "mailto:a@b.test"))
            .await
            .is_none());
    }
}
