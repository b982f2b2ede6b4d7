use std::time::Duration;

use forum_shared::Character;
use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;

const API_KEY_HEADER: &str = "x-nxopen-api-key";
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the game's character-data API, used to seed and refresh
/// profiles from a wallet address.
#[derive(Clone)]
pub struct CharacterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ApiCharacterData {
    #[serde(default)]
    level: i64,
    #[serde(rename = "imageUrl", default)]
    image_url: String,
}

#[derive(Deserialize)]
struct ApiCharacter {
    name: String,
    data: ApiCharacterData,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    characters: Vec<ApiCharacter>,
}

impl CharacterClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, wallet: &str) -> String {
        format!(
            "{}/accounts/{}/characters?paginationParam.pageNo=1",
            self.base_url,
            urlencoding::encode(wallet)
        )
    }

    pub async fn fetch(&self, wallet: &str) -> Result<Vec<Character>, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Upstream("character API key is not configured".into()))?;

        let resp = self
            .http
            .get(self.url(wallet))
            .header(API_KEY_HEADER, api_key)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("character API unreachable: {e}")))?;

        let status = resp.status();
        debug!(wallet, %status, "character API responded");
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "wallet not found or invalid (status {status})"
            )));
        }

        let body = resp
            .json::<ApiResponse>()
            .await
            .map_err(|e| AppError::Upstream(format!("malformed character API response: {e}")))?;

        Ok(body
            .characters
            .into_iter()
            .map(|c| Character {
                name: c.name,
                level: c.data.level,
                image_url: c.data.image_url,
            })
            .collect())
    }
}
