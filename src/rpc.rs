//! The RPC envelope.
//!
//! A request body is the UTF-8 string `<method_name>:<method_number>:<format>:
//! <request_json>`, where `format` is empty for dense JSON or `readable`.
//! [`Service`] dispatches bodies to registered handlers independently of any
//! HTTP framework; [`ServiceClient`] speaks the same framing over reqwest.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use serde_json::{json, Value};
use url::Url;

use crate::error::{Error, Result};
use crate::serializer::{JsonFlavor, Serializer};

/// A fixed HTML page serving the browser-based RPC explorer.
const RESTUDIO_HTML: &str = include_str!("restudio.html");

/// Identifies one RPC method: its name, its number (explicit in the schema
/// or derived from the name by the schema compiler), and the serializers of
/// its request and response types.
pub struct Method<Req, Resp> {
    name: &'static str,
    number: i32,
    request_serializer: Serializer<Req>,
    response_serializer: Serializer<Resp>,
}

impl<Req, Resp> Method<Req, Resp> {
    /// Builds a method identity.
    pub fn new(
        name: &'static str,
        number: i32,
        request_serializer: Serializer<Req>,
        response_serializer: Serializer<Resp>,
    ) -> Self {
        Method {
            name,
            number,
            request_serializer,
            response_serializer,
        }
    }

    /// The method name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The method number.
    pub fn number(&self) -> i32 {
        self.number
    }

    /// Serializer for request values.
    pub fn request_serializer(&self) -> &Serializer<Req> {
        &self.request_serializer
    }

    /// Serializer for response values.
    pub fn response_serializer(&self) -> &Serializer<Resp> {
        &self.response_serializer
    }
}

impl<Req, Resp> Clone for Method<Req, Resp> {
    fn clone(&self) -> Self {
        Method {
            name: self.name,
            number: self.number,
            request_serializer: self.request_serializer.clone(),
            response_serializer: self.response_serializer.clone(),
        }
    }
}

/// A framework-agnostic HTTP response: the host server maps this onto its
/// own response type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    /// HTTP status code: 200, 400 or 500.
    pub status: u16,
    /// Value for the `Content-Type` header.
    pub content_type: &'static str,
    /// Response body.
    pub body: String,
}

impl RpcResponse {
    fn ok_json(body: String) -> RpcResponse {
        RpcResponse {
            status: 200,
            content_type: "application/json",
            body,
        }
    }

    fn ok_html(body: String) -> RpcResponse {
        RpcResponse {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    fn bad_request(message: String) -> RpcResponse {
        RpcResponse {
            status: 400,
            content_type: "text/plain",
            body: format!("bad request: {message}"),
        }
    }

    fn server_error(message: String) -> RpcResponse {
        RpcResponse {
            status: 500,
            content_type: "text/plain",
            body: format!("server error: {message}"),
        }
    }
}

enum HandlerFailure {
    BadRequest(String),
    Server(String),
}

type MethodCall = Box<
    dyn Fn(&str, JsonFlavor) -> BoxFuture<'static, core::result::Result<String, HandlerFailure>>
        + Send
        + Sync,
>;

struct BoundMethod {
    name: &'static str,
    number: i32,
    request_type: Box<dyn Fn() -> Value + Send + Sync>,
    response_type: Box<dyn Fn() -> Value + Send + Sync>,
    call: MethodCall,
}

/// An RPC server: a set of methods bound to async handlers, exposed through
/// a single [`handle_request`](Service::handle_request) entry point.
#[derive(Default)]
pub struct Service {
    methods: HashMap<i32, BoundMethod>,
}

impl Service {
    /// An empty service.
    pub fn new() -> Service {
        Service::default()
    }

    /// Binds `handler` to `method`. Method numbers must be unique within a
    /// service.
    pub fn add_method<Req, Resp, F, Fut>(
        &mut self,
        method: Method<Req, Resp>,
        handler: F,
    ) -> Result<()>
    where
        Req: Send + 'static,
        Resp: 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        if self.methods.contains_key(&method.number) {
            return Err(Error::DuplicateMethodNumber(method.number));
        }
        let request_serializer = method.request_serializer.clone();
        let response_serializer = method.response_serializer.clone();
        let call: MethodCall = Box::new(move |payload, flavor| {
            let request = match request_serializer.from_json_code(payload) {
                Ok(request) => request,
                Err(error) => {
                    return Box::pin(async move { Err(HandlerFailure::BadRequest(error.to_string())) })
                }
            };
            let future = handler(request);
            let response_serializer = response_serializer.clone();
            Box::pin(async move {
                match future.await {
                    Ok(response) => Ok(response_serializer.to_json_code(&response, flavor)),
                    Err(error) => Err(HandlerFailure::Server(format!("{error:#}"))),
                }
            })
        });
        self.methods.insert(
            method.number,
            BoundMethod {
                name: method.name,
                number: method.number,
                request_type: {
                    let s = method.request_serializer.clone();
                    Box::new(move || s.type_descriptor().as_json())
                },
                response_type: {
                    let s = method.response_serializer.clone();
                    Box::new(move || s.type_descriptor().as_json())
                },
                call,
            },
        );
        Ok(())
    }

    /// The registered method names, ordered by number.
    pub fn method_names(&self) -> Vec<&'static str> {
        let mut methods: Vec<_> = self.methods.values().collect();
        methods.sort_by_key(|m| m.number);
        methods.into_iter().map(|m| m.name).collect()
    }

    fn method_list(&self) -> Value {
        let mut methods: Vec<_> = self.methods.values().collect();
        methods.sort_by_key(|m| m.number);
        json!({
            "methods": methods
                .into_iter()
                .map(|m| {
                    json!({
                        "method": m.name,
                        "number": m.number,
                        "request": (m.request_type)(),
                        "response": (m.response_type)(),
                    })
                })
                .collect::<Vec<_>>(),
        })
    }

    /// Dispatches one request body.
    ///
    /// An empty body or `list` returns the JSON self-description of every
    /// registered method; `restudio` returns the RPC explorer page; anything
    /// else is parsed as a framed request. Handler failures become 500
    /// responses; no partial response is ever produced.
    pub async fn handle_request(&self, body: &str) -> RpcResponse {
        if body.is_empty() || body == "list" {
            let list = serde_json::to_string_pretty(&self.method_list())
                .expect("serializing a Value cannot fail");
            return RpcResponse::ok_json(list);
        }
        if body == "restudio" {
            return RpcResponse::ok_html(RESTUDIO_HTML.to_string());
        }

        let mut parts = body.splitn(4, ':');
        let (name, number, format, payload) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(number), Some(format), Some(payload)) => {
                    (name, number, format, payload)
                }
                _ => {
                    return RpcResponse::bad_request(
                        "expected <method>:<number>:<format>:<request>".to_string(),
                    )
                }
            };
        let number: i32 = match number.parse() {
            Ok(number) => number,
            Err(_) => return RpcResponse::bad_request(format!("invalid method number '{number}'")),
        };
        let flavor = match format {
            "" => JsonFlavor::Dense,
            "readable" => JsonFlavor::Readable,
            _ => return RpcResponse::bad_request(format!("invalid format '{format}'")),
        };
        let Some(method) = self.methods.get(&number) else {
            tracing::warn!(name, number, "request for unknown method number");
            return RpcResponse::bad_request(format!("unknown method number {number}"));
        };
        tracing::debug!(method = method.name, number, "dispatching request");
        match (method.call)(payload, flavor).await {
            Ok(response) => RpcResponse::ok_json(response),
            Err(HandlerFailure::BadRequest(message)) => RpcResponse::bad_request(message),
            Err(HandlerFailure::Server(message)) => {
                tracing::error!(method = method.name, error = %message, "handler failed");
                RpcResponse::server_error(message)
            }
        }
    }
}

/// HTTP method used by [`ServiceClient::invoke_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Request framed into the query string.
    Get,
    /// Request framed into the body.
    Post,
}

/// An RPC client bound to one service endpoint.
#[derive(Clone)]
pub struct ServiceClient {
    endpoint: Url,
    http: reqwest::Client,
    request_headers: Option<Arc<dyn Fn(&mut HeaderMap) + Send + Sync>>,
}

impl ServiceClient {
    /// Builds a client for the service at `endpoint`, an absolute URL
    /// without a query string.
    pub fn new(endpoint: &str) -> Result<ServiceClient> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.query().is_some() {
            return Err(Error::EndpointHasQuery(endpoint.to_string()));
        }
        Ok(ServiceClient {
            endpoint,
            http: reqwest::Client::new(),
            request_headers: None,
        })
    }

    /// Installs a callback invoked before each request to inject headers,
    /// e.g. authentication.
    pub fn with_request_headers(
        mut self,
        callback: impl Fn(&mut HeaderMap) + Send + Sync + 'static,
    ) -> ServiceClient {
        self.request_headers = Some(Arc::new(callback));
        self
    }

    /// Invokes `method` over HTTP POST.
    pub async fn invoke_remote<Req: 'static, Resp: 'static>(
        &self,
        method: &Method<Req, Resp>,
        request: &Req,
    ) -> Result<Resp> {
        self.invoke_with(method, request, HttpMethod::Post).await
    }

    /// Invokes `method` with an explicit HTTP method. GET requests carry the
    /// framed body in the query string, with `%` doubled to `%25`.
    pub async fn invoke_with<Req: 'static, Resp: 'static>(
        &self,
        method: &Method<Req, Resp>,
        request: &Req,
        http_method: HttpMethod,
    ) -> Result<Resp> {
        let request_json = method
            .request_serializer
            .to_json_code(request, JsonFlavor::Dense);
        let body = format!("{}:{}::{}", method.name, method.number, request_json);
        let builder = match http_method {
            HttpMethod::Post => self.http.post(self.endpoint.clone()).body(body),
            HttpMethod::Get => {
                let mut url = self.endpoint.clone();
                url.set_query(Some(&body.replace('%', "%25")));
                self.http.get(url)
            }
        };
        let builder = match &self.request_headers {
            Some(callback) => {
                let mut headers = HeaderMap::new();
                callback(&mut headers);
                builder.headers(headers)
            }
            None => builder,
        };
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::RpcStatus {
                status: status.as_u16(),
                message: text,
            });
        }
        // Responses come from a trusted peer; keep unknown fields so values
        // can be re-encoded without loss.
        method
            .response_serializer
            .from_json_code_keep_unrecognized(&text)
    }
}
