use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::frame::WorldLayout;
use crate::params::RunParams;
use crate::remote::{LatestStepReply, RemoteReply, RemoteStepSource, StepOutcome, StepReply};

/// Simulation service over HTTP/JSON.
pub struct HttpStepSource {
    client: Client,
    base: Url,
}

#[derive(Serialize)]
struct InitBody<'a> {
    model_name: &'a str,
    #[serde(flatten)]
    params: &'a RunParams,
}

#[derive(Serialize)]
struct ModelBody<'a> {
    model_name: &'a str,
}

impl HttpStepSource {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        let mut base = Url::parse(&cfg.server_base).with_context(|| format!("bad server url {}", cfg.server_base))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    pub fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base.join(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("GET {} returned {}", url.path(), status));
        }
        Ok(resp.json().await?)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: Url, body: &B) -> Result<T> {
        let resp = self.client.post(url.clone()).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("POST {} returned {}", url.path(), status));
        }
        Ok(resp.json().await?)
    }

    async fn fetch_frame(&self, path: &str, model: &str, step: u64) -> StepOutcome {
        let result = async {
            let url = self.endpoint(path, &[("model_name", model.to_string()), ("step", step.to_string())])?;
            self.get_json::<StepReply>(url).await
        }
        .await;
        match result {
            Ok(reply) => reply.into(),
            Err(err) => StepOutcome::Failure(err.to_string()),
        }
    }

    async fn control(&self, path: &str, model: &str) -> RemoteReply {
        let result = async {
            let url = self.endpoint(path, &[])?;
            self.post_json::<_, RemoteReply>(url, &ModelBody { model_name: model }).await
        }
        .await;
        result.unwrap_or_else(|err| RemoteReply::failed(err.to_string()))
    }
}

#[async_trait]
impl RemoteStepSource for HttpStepSource {
    async fn init(&self, model: &str, params: &RunParams) -> RemoteReply {
        let result = async {
            let url = self.endpoint("init", &[])?;
            self.post_json::<_, RemoteReply>(url, &InitBody { model_name: model, params }).await
        }
        .await;
        result.unwrap_or_else(|err| RemoteReply::failed(err.to_string()))
    }

    async fn step(&self, model: &str, step: u64) -> StepOutcome {
        self.fetch_frame("step", model, step).await
    }

    async fn world_map(&self, model: &str) -> Result<WorldLayout, String> {
        let result = async {
            let url = self.endpoint("world_map", &[("model_name", model.to_string())])?;
            self.get_json::<WorldLayout>(url).await
        }
        .await;
        result.map_err(|err| err.to_string())
    }

    async fn old_data(&self, model: &str, step: u64) -> StepOutcome {
        self.fetch_frame("old_data", model, step).await
    }

    async fn latest_step(&self, model: &str) -> LatestStepReply {
        let result = async {
            let url = self.endpoint("latest_step", &[("model_name", model.to_string())])?;
            self.get_json::<LatestStepReply>(url).await
        }
        .await;
        result.unwrap_or(LatestStepReply { success: false, latest_step: 0 })
    }

    async fn terminate(&self, model: &str) -> RemoteReply {
        self.control("terminate", model).await
    }

    async fn delete(&self, model: &str) -> RemoteReply {
        self.control("delete", model).await
    }
}
