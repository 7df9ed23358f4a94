//! REST calls against the dispatch backend.
//!
//! Authorised calls carry the session's bearer token. A `401` triggers at most one retry after a
//! token refresh; concurrent rejections share a single refresh through `refresh_gate`.

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    error::{ApiError, ApiException},
    protocol::{
        ChangePasswordBody, CheckPasswordBody, CreateStationBody, CreateUserBody,
        CreateVehicleBody, DeleteVehicleBody, LoginRequest, LoginResponse, MessageResponse,
        RefreshRequest, RefreshResponse, ReportIncidentBody,
    },
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::ClientSettings, error::ApiCallError, notice::Notice, session::SessionContext, ClientEvent,
};

pub struct RestClient {
    http: Client,
    settings: ClientSettings,
    session: SessionContext,
    refresh_gate: Mutex<()>,
    events: broadcast::Sender<ClientEvent>,
}

impl RestClient {
    pub fn new(
        settings: ClientSettings,
        session: SessionContext,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            http: Client::new(),
            settings,
            session,
            refresh_gate: Mutex::new(()),
            events,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiCallError> {
        let url = self.url("login/")?;
        let response = self
            .http
            .post(url)
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let login: LoginResponse = decode(response).await?;
        self.session.establish(&login).await;
        info!(
            user_id = login.user.user_id.0,
            role = login.user.role.as_str(),
            "api: signed in"
        );
        Ok(login)
    }

    /// Public reporter endpoint; no session required.
    pub async fn report_incident(
        &self,
        body: &ReportIncidentBody,
    ) -> Result<MessageResponse, ApiCallError> {
        let url = self.url("incidents/report/")?;
        let response = self.http.post(url).json(body).send().await?;
        decode(response).await
    }

    pub async fn check_old_password(
        &self,
        old_password: &str,
    ) -> Result<MessageResponse, ApiCallError> {
        let body = CheckPasswordBody {
            old_password: old_password.to_string(),
        };
        self.authorized(Method::POST, "check-old-password/", &body)
            .await
    }

    pub async fn change_password(
        &self,
        new_password: &str,
    ) -> Result<MessageResponse, ApiCallError> {
        let body = ChangePasswordBody {
            new_password: new_password.to_string(),
        };
        self.authorized(Method::POST, "change-password/", &body)
            .await
    }

    pub async fn create_vehicle(
        &self,
        body: &CreateVehicleBody,
    ) -> Result<MessageResponse, ApiCallError> {
        self.authorized(Method::POST, "admin/vehicles/create/", body)
            .await
    }

    pub async fn delete_vehicle(
        &self,
        body: &DeleteVehicleBody,
    ) -> Result<MessageResponse, ApiCallError> {
        self.authorized(Method::DELETE, "admin/vehicles/delete/", body)
            .await
    }

    pub async fn create_station(
        &self,
        body: &CreateStationBody,
    ) -> Result<MessageResponse, ApiCallError> {
        self.authorized(Method::POST, "admin/stations/create/", body)
            .await
    }

    pub async fn create_user(
        &self,
        body: &CreateUserBody,
    ) -> Result<MessageResponse, ApiCallError> {
        self.authorized(Method::POST, "admin/users/create/", body)
            .await
    }

    /// Forces a refresh of the current access token, sharing the gate with 401 recovery.
    pub async fn refresh_access_token(&self) -> Result<String, ApiCallError> {
        let current = self
            .session
            .access_token()
            .await
            .ok_or(ApiCallError::Unauthenticated)?;
        self.recover_from_rejection(&current).await
    }

    async fn authorized<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, ApiCallError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path)?;
        let token = self
            .session
            .access_token()
            .await
            .ok_or(ApiCallError::Unauthenticated)?;

        let response = self
            .request(method.clone(), url.clone(), &token)
            .json(body)
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return decode(response).await;
        }

        debug!(path, "api: access token rejected; refreshing");
        let fresh = self.recover_from_rejection(&token).await?;
        let retried = self.request(method, url, &fresh).json(body).send().await?;
        decode(retried).await
    }

    /// Returns a usable access token after `rejected` was refused by the server.
    ///
    /// Callers queue on the gate. Whoever finds the stored token still equal to `rejected` performs
    /// the refresh; everyone after that reuses the stored replacement.
    async fn recover_from_rejection(&self, rejected: &str) -> Result<String, ApiCallError> {
        let _gate = self.refresh_gate.lock().await;

        match self.session.access_token().await {
            Some(current) if current != rejected => return Ok(current),
            Some(_) => {}
            // An earlier refresh already failed and ended the session.
            None => return Err(ApiCallError::SessionExpired),
        }

        let Some(refresh) = self.session.refresh_token().await else {
            warn!("api: no refresh token in session");
            return Err(self.expire().await);
        };

        match self.request_refresh(&refresh).await {
            Ok(access_token) => {
                self.session.replace_access_token(access_token.clone()).await;
                info!("api: access token refreshed");
                Ok(access_token)
            }
            Err(err) => {
                warn!("api: token refresh failed: {err}");
                Err(self.expire().await)
            }
        }
    }

    async fn request_refresh(&self, refresh: &str) -> Result<String, ApiCallError> {
        let url = self.url("refresh-token/")?;
        let response = self
            .http
            .post(url)
            .json(&RefreshRequest {
                refresh: refresh.to_string(),
            })
            .send()
            .await?;
        let body: RefreshResponse = decode(response).await?;
        Ok(body.access_token)
    }

    async fn expire(&self) -> ApiCallError {
        self.session.clear().await;
        info!("api: session cleared");
        let _ = self.events.send(ClientEvent::SessionExpired);
        let _ = self.events.send(ClientEvent::Notice(Notice::session_expired()));
        ApiCallError::SessionExpired
    }

    fn request(&self, method: Method, url: Url, token: &str) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(token)
    }

    fn url(&self, path: &str) -> Result<Url, ApiCallError> {
        self.settings
            .endpoint(path)
            .map_err(|err| ApiCallError::Endpoint(err.to_string()))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiCallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let message = match response.json::<ApiError>().await {
        Ok(body) if !body.message.is_empty() => body.message,
        _ => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    Err(ApiException::new(Some(status.as_u16()), message).into())
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
