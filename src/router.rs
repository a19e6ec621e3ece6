//! iKuai router client.
//!
//! Stateful HTTP client against the router's web console. Login derives
//! the session cookie; every subsequent call goes through
//! `/Action/call` with `{func_name, action, param}`. The controller
//! uses it to program static DHCP reservations and DNAT port forwards
//! for provisioned guests.

use md5::{Digest, Md5};
use serde_json::json;
use tracing::warn;

/// Result code the console returns on success.
const RESULT_OK: i64 = 10000;

#[derive(Debug, Clone)]
struct Session {
    cookie: String,
}

#[derive(Debug)]
pub struct IkuaiClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    session: Option<Session>,
}

/// One static DHCP reservation row.
#[derive(Debug, Clone)]
pub struct StaticDhcpRow {
    pub ip_addr: String,
    pub mac: String,
    pub hostname: String,
    pub gateway: String,
    pub interface: String,
    pub dns1: String,
    pub dns2: String,
    pub comment: String,
}

impl StaticDhcpRow {
    pub fn new(ip_addr: impl Into<String>, mac: impl Into<String>) -> Self {
        Self {
            ip_addr: ip_addr.into(),
            mac: mac.into(),
            hostname: String::new(),
            gateway: "auto".to_string(),
            interface: "auto".to_string(),
            dns1: "114.114.114.114".to_string(),
            dns2: "223.5.5.5".to_string(),
            comment: String::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// One DNAT port forward row.
#[derive(Debug, Clone)]
pub struct DnatRow {
    pub wan_port: String,
    pub lan_addr: String,
    pub lan_port: String,
    pub interface: String,
    pub protocol: String,
    pub src_addr: String,
    pub comment: String,
}

impl DnatRow {
    pub fn new(
        wan_port: impl Into<String>,
        lan_addr: impl Into<String>,
        lan_port: impl Into<String>,
    ) -> Self {
        Self {
            wan_port: wan_port.into(),
            lan_addr: lan_addr.into(),
            lan_port: lan_port.into(),
            interface: "wan1".to_string(),
            protocol: "tcp+udp".to_string(),
            src_addr: String::new(),
            comment: String::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

impl IkuaiClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            username: username.into(),
            password: password.into(),
            session: None,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Log in to the console. The password travels twice: an MD5 digest
    /// in `passwd` and `"salt_11" + password` in `pass`. On
    /// `Result == 10000` the `sess_key` cookie is retained together
    /// with the username and a literal `login=1`; any other result
    /// stores no session and returns false.
    pub async fn login(&mut self) -> bool {
        let passwd = hex::encode(Md5::digest(self.password.as_bytes()));
        let body = json!({
            "username": self.username,
            "passwd": passwd,
            "pass": format!("salt_11{}", self.password),
            "remember_password": "",
        });
        let response = match self
            .http
            .post(format!("{}/Action/login", self.base_url))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "router login request failed");
                return false;
            }
        };

        let sess_key = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|cookie| cookie.split(';').next())
            .find_map(|pair| pair.trim().strip_prefix("sess_key=").map(str::to_string));

        let decoded: serde_json::Value = match response.json().await {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "router login returned non-json body");
                return false;
            }
        };
        if decoded.get("Result").and_then(|value| value.as_i64()) != Some(RESULT_OK) {
            let err_msg = decoded
                .get("ErrMsg")
                .and_then(|value| value.as_str())
                .unwrap_or("unknown error");
            warn!(err_msg, "router login rejected");
            return false;
        }
        let Some(sess_key) = sess_key else {
            warn!("router login succeeded but no sess_key cookie was set");
            return false;
        };

        self.session = Some(Session {
            cookie: format!("sess_key={}; username={}; login=1", sess_key, self.username),
        });
        true
    }

    /// One `/Action/call` round trip. Fails immediately when invoked
    /// before a successful login.
    pub async fn call(
        &self,
        func_name: &str,
        action: &str,
        param: serde_json::Value,
    ) -> Option<serde_json::Value> {
        let session = match &self.session {
            Some(session) => session,
            None => {
                warn!(func_name, action, "router call before login");
                return None;
            }
        };
        let body = json!({
            "func_name": func_name,
            "action": action,
            "param": param,
        });
        let response = self
            .http
            .post(format!("{}/Action/call", self.base_url))
            .header(reqwest::header::COOKIE, &session.cookie)
            .json(&body)
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => response.json().await.ok(),
            Ok(response) => {
                warn!(func_name, action, status = %response.status(), "router call failed");
                None
            }
            Err(err) => {
                warn!(func_name, action, error = %err, "router call failed");
                None
            }
        }
    }

    fn call_succeeded(result: Option<serde_json::Value>) -> bool {
        result
            .and_then(|value| value.get("success").and_then(|flag| flag.as_bool()))
            .unwrap_or(false)
    }

    /// Add a static DHCP reservation.
    pub async fn add_static_dhcp(&self, row: &StaticDhcpRow) -> bool {
        let param = json!({
            "newRow": true,
            "hostname": row.hostname,
            "ip_addr": row.ip_addr,
            "mac": row.mac,
            "gateway": row.gateway,
            "interface": row.interface,
            "dns1": row.dns1,
            "dns2": row.dns2,
            "comment": row.comment,
            "enabled": "yes",
        });
        Self::call_succeeded(self.call("dhcp_static", "add", param).await)
    }

    /// Delete a static DHCP reservation, keyed by whichever identifier
    /// is supplied: id first, then ip, then mac.
    pub async fn delete_static_dhcp(
        &self,
        entry_id: Option<i64>,
        ip_addr: Option<&str>,
        mac: Option<&str>,
    ) -> bool {
        let param = if let Some(id) = entry_id {
            json!({ "id": id })
        } else if let Some(ip) = ip_addr {
            json!({ "ip_addr": ip })
        } else if let Some(mac) = mac {
            json!({ "mac": mac })
        } else {
            warn!("delete_static_dhcp needs an id, ip or mac");
            return false;
        };
        Self::call_succeeded(self.call("dhcp_static", "del", param).await)
    }

    /// Add a DNAT port forward.
    pub async fn add_dnat(&self, row: &DnatRow) -> bool {
        let param = json!({
            "enabled": "yes",
            "comment": row.comment,
            "interface": row.interface,
            "lan_addr": row.lan_addr,
            "protocol": row.protocol,
            "wan_port": row.wan_port,
            "lan_port": row.lan_port,
            "src_addr": row.src_addr,
        });
        Self::call_succeeded(self.call("dnat", "add", param).await)
    }

    /// Delete a DNAT port forward by id, or by the wan port plus lan
    /// address pair.
    pub async fn delete_dnat(
        &self,
        entry_id: Option<i64>,
        wan_port: Option<&str>,
        lan_addr: Option<&str>,
    ) -> bool {
        let param = if let Some(id) = entry_id {
            json!({ "id": id })
        } else if let (Some(wan_port), Some(lan_addr)) = (wan_port, lan_addr) {
            json!({ "wan_port": wan_port, "lan_addr": lan_addr })
        } else {
            warn!("delete_dnat needs an id or wan_port + lan_addr");
            return false;
        };
        Self::call_succeeded(self.call("dnat", "del", param).await)
    }
}
