use super::{MirrorClient, MirrorError, MirrorRecord};
use crate::config::MirrorConfig;
use crate::core::MirrorPosition;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{Level, event};

const VALUE_INPUT_OPTION: (&str, &str) = ("valueInputOption", "USER_ENTERED");
const LAST_COLUMN: char = 'E';
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(rename = "spreadsheetId")]
    spreadsheet_id: String,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    updates: AppendUpdates,
}

#[derive(Debug, Deserialize)]
struct AppendUpdates {
    #[serde(rename = "updatedRange")]
    updated_range: String,
}

/// Mirror client for a spreadsheet-values REST API.
///
/// Append positions come straight from the API's `updatedRange`, so the
/// row number is authoritative and never derived by counting.
#[derive(Debug, Clone)]
pub struct SheetsMirrorClient {
    http: reqwest::Client,
    config: MirrorConfig,
}

impl SheetsMirrorClient {
    pub fn new(config: MirrorConfig) -> Result<Self, MirrorError> {
        Url::parse(&config.base_url).map_err(|_| MirrorError::NotConfigured)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|err| MirrorError::Transport(err.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, MirrorError> {
        let mut url = Url::parse(&self.config.base_url).map_err(|_| MirrorError::NotConfigured)?;
        url.path_segments_mut()
            .map_err(|_| MirrorError::NotConfigured)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sheet-qualified A1 range with the title quoted, e.g. `'Q1 Receipts'!A2:E2`.
    fn range(&self, cells: &str) -> String {
        quoted_range(&self.config.sheet_title, cells)
    }

    fn values_url(&self, mirror_id: &str, range: &str) -> Result<Url, MirrorError> {
        self.url(&["v4", "spreadsheets", mirror_id, "values", range])
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, MirrorError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| MirrorError::Transport(err.to_string()))?;
        check_status(response).await
    }

    async fn write_header(&self, mirror_id: &str) -> Result<(), MirrorError> {
        let range = self.range(&format!("A1:{LAST_COLUMN}1"));
        let url = self.values_url(mirror_id, &range)?;
        self.send(
            self.http
                .put(url)
                .query(&[VALUE_INPUT_OPTION])
                .json(&json!({ "values": [MirrorRecord::header()] })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MirrorClient for SheetsMirrorClient {
    async fn create(&self, tenant_name: &str) -> Result<String, MirrorError> {
        let url = self.url(&["v4", "spreadsheets"])?;
        let body = json!({
            "properties": { "title": format!("{}{}", self.config.title_prefix, tenant_name) },
            "sheets": [{ "properties": { "title": self.config.sheet_title } }],
        });
        let response = self.send(self.http.post(url).json(&body)).await?;
        let created: CreateResponse = response
            .json()
            .await
            .map_err(|err| MirrorError::Malformed(err.to_string()))?;

        self.write_header(&created.spreadsheet_id).await?;
        event!(Level::DEBUG, mirror_id = %created.spreadsheet_id, "spreadsheet provisioned");
        Ok(created.spreadsheet_id)
    }

    async fn append(
        &self,
        mirror_id: &str,
        record: &MirrorRecord,
    ) -> Result<MirrorPosition, MirrorError> {
        let range = self.range(&format!("A:{LAST_COLUMN}:append"));
        let url = self.values_url(mirror_id, &range)?;
        let response = self
            .send(
                self.http
                    .post(url)
                    .query(&[VALUE_INPUT_OPTION, ("insertDataOption", "INSERT_ROWS")])
                    .json(&json!({ "values": [record.to_row()] })),
            )
            .await?;
        let appended: AppendResponse = response
            .json()
            .await
            .map_err(|err| MirrorError::Malformed(err.to_string()))?;

        parse_range_row(&appended.updates.updated_range).ok_or_else(|| {
            MirrorError::Malformed(format!(
                "cannot read row from updatedRange '{}'",
                appended.updates.updated_range
            ))
        })
    }

    async fn update(
        &self,
        mirror_id: &str,
        position: MirrorPosition,
        record: &MirrorRecord,
    ) -> Result<(), MirrorError> {
        if position == 0 {
            return Err(MirrorError::Rejected {
                status: StatusCode::BAD_REQUEST.as_u16(),
                message: "positions are 1-based".to_string(),
            });
        }
        let range = self.range(&format!("A{position}:{LAST_COLUMN}{position}"));
        let url = self.values_url(mirror_id, &range)?;
        self.send(
            self.http
                .put(url)
                .query(&[VALUE_INPUT_OPTION])
                .json(&json!({ "values": [record.to_row()] })),
        )
        .await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, MirrorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(MirrorError::RateLimited);
    }
    if status.is_server_error() {
        return Err(MirrorError::Unavailable {
            status: status.as_u16(),
        });
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    Err(MirrorError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Quotes a sheet title for A1 notation; embedded quotes are doubled.
pub fn quoted_range(sheet_title: &str, cells: &str) -> String {
    format!("'{}'!{cells}", sheet_title.replace('\'', "''"))
}

/// Extracts the starting row of an A1-notation range such as
/// `Receipts!A7:E7` or `'Q1 Receipts'!A12:E12`.
pub fn parse_range_row(range: &str) -> Option<MirrorPosition> {
    let cells = range.rsplit_once('!').map_or(range, |(_, cells)| cells);
    let first = cells.split(':').next()?;
    let digits: String = first.chars().skip_while(|c| c.is_ascii_alphabetic()).collect();
    digits.parse::<MirrorPosition>().ok().filter(|row| *row > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_from_updated_ranges() {
        assert_eq!(parse_range_row("Receipts!A7:E7"), Some(7));
        assert_eq!(parse_range_row("'Q1 Receipts'!A12:E12"), Some(12));
        assert_eq!(parse_range_row("A3"), Some(3));
        assert_eq!(parse_range_row("Receipts!A:E"), None);
        assert_eq!(parse_range_row("Receipts!A0:E0"), None);
    }

    #[test]
    fn sheet_titles_are_quoted() {
        assert_eq!(quoted_range("Receipts", "A1:E1"), "'Receipts'!A1:E1");
        assert_eq!(quoted_range("Q1 Receipts!", "A2:E2"), "'Q1 Receipts!'!A2:E2");
        assert_eq!(quoted_range("Bob's", "A:E:append"), "'Bob''s'!A:E:append");
        assert_eq!(parse_range_row(&quoted_range("Q1 Receipts!", "A9:E9")), Some(9));
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = SheetsMirrorClient::new(MirrorConfig::new("not a url")).unwrap_err();
        assert_eq!(err, MirrorError::NotConfigured);
    }

    #[test]
    fn values_url_keeps_range_in_one_segment() {
        let client = SheetsMirrorClient::new(MirrorConfig::new("http://127.0.0.1:1/")).unwrap();
        let url = client.values_url("sheet-1", "Receipts!A:E:append").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:1/v4/spreadsheets/sheet-1/values/Receipts!A:E:append"
        );

        let spaced = client.range("A2:E2");
        let url = client.values_url("sheet-1", &spaced).unwrap();
        assert!(url.path().ends_with("/values/'Receipts'!A2:E2"));
    }
}
