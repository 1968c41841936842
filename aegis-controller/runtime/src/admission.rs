use crate::{
    inject::{self, Injector},
    k8s::{Pod, Resource, ResourceExt},
    store::Store,
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Injects the aegis proxy into annotated pods.
#[derive(Clone)]
pub struct Admission<S> {
    store: S,
    injector: Injector,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl<S: Store> tower::Service<Request<hyper::body::Incoming>> for Admission<S> {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl<S: Store> Admission<S> {
    pub fn new(store: S, injector: Injector) -> Self {
        Self { store, injector }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        if !is_kind::<Pod>(&req) {
            return rsp;
        }
        let Some(obj) = req.object.as_ref() else {
            return rsp;
        };

        let pod = match parse_pod(obj) {
            Ok(pod) => pod,
            Err(error) => {
                info!(%error, "Failed to parse pod");
                return rsp.deny(error);
            }
        };
        let ns = req
            .namespace
            .clone()
            .or_else(|| pod.namespace())
            .unwrap_or_default();
        let name = pod
            .metadata
            .name
            .clone()
            .or_else(|| pod.metadata.generate_name.clone())
            .unwrap_or_default();

        match self.inject(&ns, pod).await {
            Ok(None) => rsp,
            Ok(Some(patch)) => {
                info!(%ns, %name, "Injected proxy");
                match rsp.with_patch(patch) {
                    Ok(rsp) => rsp,
                    Err(error) => {
                        warn!(%error, %ns, %name, "Failed to serialize patch");
                        AdmissionResponse::from(&req).deny(error)
                    }
                }
            }
            Err(error) => {
                info!(%error, %ns, %name, "Denied");
                rsp.deny(error)
            }
        }
    }

    /// Returns the patch that injects the proxy, if the pod asks for one and
    /// does not already have it.
    async fn inject(&self, ns: &str, pod: Pod) -> anyhow::Result<Option<json_patch::Patch>> {
        let Some(request) = inject::parse(pod.annotations())? else {
            debug!(%ns, "No injection requested");
            return Ok(None);
        };
        let plan = self.injector.plan(&self.store, ns, request).await?;

        let original = serde_json::to_value(&pod)?;
        let mut pod = pod;
        if !self.injector.apply(&mut pod, &plan)? {
            debug!(%ns, "Proxy already injected");
            return Ok(None);
        }
        let patched = serde_json::to_value(&pod)?;
        Ok(Some(json_patch::diff(&original, &patched)))
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn parse_pod(obj: &DynamicObject) -> Result<Pod, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
