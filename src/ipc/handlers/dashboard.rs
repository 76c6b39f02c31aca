use crate::dashboard::{ChartKind, ChartRange, Dashboard, Period};
use crate::ipc::helpers::{params, reply, store};
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;

type Reply = Result<serde_json::Value, serde_json::Value>;

#[derive(Deserialize, Default)]
#[serde(default)]
struct StatsParams {
    period: Period,
}

#[derive(Deserialize)]
#[serde(default)]
struct RecentParams {
    limit: usize,
}

impl Default for RecentParams {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

#[derive(Deserialize)]
struct ChartParams {
    #[serde(rename = "type")]
    kind: ChartKind,
    #[serde(flatten)]
    range: ChartRange,
}

fn dashboard<'a>(state: &'a AppState, req: &Request) -> Result<Dashboard<'a>, serde_json::Value> {
    Ok(Dashboard::new(
        store(state, req)?,
        state.clock.as_ref(),
        &state.risk,
        &state.performance,
    ))
}

fn handle_dashboard_overview(state: &AppState, req: &Request) -> Reply {
    Ok(reply(req, dashboard(state, req)?.overview()))
}

fn handle_dashboard_alerts(state: &AppState, req: &Request) -> Reply {
    Ok(reply(req, dashboard(state, req)?.alerts()))
}

fn handle_dashboard_stats(state: &AppState, req: &Request) -> Reply {
    let p: StatsParams = params(req, None)?;
    Ok(reply(req, dashboard(state, req)?.stats(p.period)))
}

fn handle_dashboard_recent(state: &AppState, req: &Request) -> Reply {
    let p: RecentParams = params(req, None)?;
    let feed = dashboard(state, req)?.recent(p.limit);
    Ok(reply(req, feed.map(|activities| serde_json::json!({ "activities": activities }))))
}

fn handle_dashboard_charts(state: &AppState, req: &Request) -> Reply {
    let p: ChartParams = params(req, None)?;
    Ok(reply(req, dashboard(state, req)?.chart(p.kind, p.range)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "dashboard.overview" => handle_dashboard_overview(state, req),
        "dashboard.alerts" => handle_dashboard_alerts(state, req),
        "dashboard.stats" => handle_dashboard_stats(state, req),
        "dashboard.recent" => handle_dashboard_recent(state, req),
        "dashboard.charts" => handle_dashboard_charts(state, req),
        _ => return None,
    };
    Some(r.unwrap_or_else(|e| e))
}
