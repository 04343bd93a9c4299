//! Tools backed by the Panchang astronomical calendar API.
//!
//! `sunrise` and `tithi` proxy the API for a fixed observer, `today` is computed
//! locally so the model can resolve relative dates before asking for them.
mod config;
mod date;

pub use config::{
    Observer, PanchangConfig, DEFAULT_BASE_URL, DEFAULT_LATITUDE, DEFAULT_LONGITUDE,
    DEFAULT_STRATEGY, DEFAULT_TIMEZONE,
};
pub use date::{QueryDate, TodayInfo};

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::systems::System;

/// The closed set of operations this system can run
#[derive(Debug, Clone, PartialEq)]
pub enum PanchangTool {
    Sunrise { date: QueryDate },
    Tithi { date: QueryDate },
    Today,
}

impl TryFrom<ToolCall> for PanchangTool {
    type Error = AgentError;

    fn try_from(tool_call: ToolCall) -> AgentResult<Self> {
        match tool_call.name.as_str() {
            "sunrise" => Ok(PanchangTool::Sunrise {
                date: date_argument(&tool_call.arguments)?,
            }),
            "tithi" => Ok(PanchangTool::Tithi {
                date: date_argument(&tool_call.arguments)?,
            }),
            "today" => Ok(PanchangTool::Today),
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

fn date_argument(arguments: &Value) -> AgentResult<QueryDate> {
    let date = arguments
        .get("date")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AgentError::InvalidParameters("date parameter required".into()))?;
    QueryDate::parse(date)
}

/// Result of the `sunrise` tool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SunriseInfo {
    pub sunrise_time: String,
    pub date: String,
    pub location: String,
    pub timezone: String,
}

/// Result of the `tithi` tool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TithiInfo {
    pub tithi_number: u32,
    pub tithi_name: String,
    pub tithi_end_time: String,
    pub tithi_end_ghati_pal: String,
    pub formatted_end_time: String,
    pub date: String,
    pub location: String,
    pub timezone: String,
}

/// Body returned by `GET /tithi`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TithiResponse {
    tithi_number: u32,
    tithi_name_string: String,
    tithi_end_time: String,
    tithi_end_ghati_pal: String,
    tithi_formatted_end_time: String,
}

pub struct PanchangSystem {
    tools: Vec<Tool>,
    instructions: String,
    client: Client,
    config: PanchangConfig,
}

impl PanchangSystem {
    pub fn new(config: PanchangConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Build the system around an existing client so its connection pool is shared
    pub fn with_client(client: Client, config: PanchangConfig) -> Self {
        let sunrise_tool = Tool::new(
            "sunrise",
            "Get the sunrise time for a given date",
            json!({
                "type": "object",
                "required": ["date"],
                "properties": {
                    "date": {
                        "type": "string",
                        "description": "The date to get the sunrise time for"
                    }
                }
            }),
        );

        let tithi_tool = Tool::new(
            "tithi",
            "Get the tithi (lunar day) information for a given date",
            json!({
                "type": "object",
                "required": ["date"],
                "properties": {
                    "date": {
                        "type": "string",
                        "description": "The date to get the tithi information for"
                    }
                }
            }),
        );

        let today_tool = Tool::new(
            "today",
            "Get today's date",
            json!({
                "type": "object",
                "properties": {}
            }),
        );

        let instructions = format!(
            "Dates are ISO 8601 strings such as 2024-01-15. Use `today` to resolve relative \
            dates like \"today\" or \"tomorrow\" before calling `sunrise` or `tithi`. \
            All values are computed for the observer at {} in the {} time zone using the {} strategy.",
            config.observer.location(),
            config.observer.timezone,
            config.observer.strategy,
        );

        Self {
            tools: vec![sunrise_tool, tithi_tool, today_tool],
            instructions,
            client,
            config,
        }
    }

    pub async fn sunrise(&self, date: QueryDate) -> AgentResult<SunriseInfo> {
        let response = self
            .fetch("sunrise", &date, "Failed to fetch sunrise time")
            .await?;
        let body = response.text().await.map_err(|e| {
            AgentError::ExecutionError(format!("Failed to read sunrise time: {}", e))
        })?;

        let observer = &self.config.observer;
        Ok(SunriseInfo {
            sunrise_time: body.replace('"', ""),
            date: date.calendar_date(),
            location: observer.location(),
            timezone: observer.timezone.clone(),
        })
    }

    pub async fn tithi(&self, date: QueryDate) -> AgentResult<TithiInfo> {
        let response = self
            .fetch("tithi", &date, "Failed to fetch tithi information")
            .await?;
        let body = response.bytes().await.map_err(|e| {
            AgentError::ExecutionError(format!("Failed to read tithi information: {}", e))
        })?;
        let tithi: TithiResponse = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(error = %e, "tithi response did not match the expected shape");
            AgentError::ExecutionError(format!("Malformed tithi response: {}", e))
        })?;

        let observer = &self.config.observer;
        Ok(TithiInfo {
            tithi_number: tithi.tithi_number,
            tithi_name: tithi.tithi_name_string,
            tithi_end_time: tithi.tithi_end_time,
            tithi_end_ghati_pal: tithi.tithi_end_ghati_pal,
            formatted_end_time: tithi.tithi_formatted_end_time,
            date: date.calendar_date(),
            location: observer.location(),
            timezone: observer.timezone.clone(),
        })
    }

    pub fn today(&self) -> TodayInfo {
        TodayInfo::now()
    }

    pub async fn execute(&self, tool: PanchangTool) -> AgentResult<Value> {
        let result = match tool {
            PanchangTool::Sunrise { date } => serde_json::to_value(self.sunrise(date).await?),
            PanchangTool::Tithi { date } => serde_json::to_value(self.tithi(date).await?),
            PanchangTool::Today => serde_json::to_value(self.today()),
        };
        result.map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// GET `{base_url}/{resource}` for `date` and the configured observer
    async fn fetch(&self, resource: &str, date: &QueryDate, failure: &str) -> AgentResult<Response> {
        let observer = &self.config.observer;
        let query = [
            ("date", date.to_query()),
            ("latitude", observer.latitude.to_string()),
            ("longitude", observer.longitude.to_string()),
            ("timezone", observer.timezone.clone()),
            ("strategy", observer.strategy.clone()),
        ];
        let query = serde_urlencoded::to_string(query)
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        let url = format!("{}?{}", self.config.endpoint(resource), query);

        tracing::debug!(%url, "querying panchang api");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("{}: {}", failure, e)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, resource, "panchang api returned an error");
            let reason = status.canonical_reason().unwrap_or(status.as_str());
            return Err(AgentError::ExecutionError(format!("{}: {}", failure, reason)));
        }
        Ok(response)
    }
}

#[async_trait]
impl System for PanchangSystem {
    fn name(&self) -> &str {
        "panchang"
    }

    fn description(&self) -> &str {
        "Sunrise times, tithi (lunar day) details and today's date from a Panchang calendar"
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
        let tool = PanchangTool::try_from(tool_call)?;
        self.execute(tool).await
    }
}
