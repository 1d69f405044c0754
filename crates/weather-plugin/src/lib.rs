//! Weather Plugin
//!
//! Example agent plugin keeping temperature readings per city. Built as a
//! `cdylib` it is loadable from `plugins/Weather/Weather.<ext>`; as an `rlib`
//! it is linked into `agentd` and served through the static module backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use plugin_types::{
    AgentContext, AgentEvent, PluginError, PluginLifecycle, PluginResult, agent_plugin,
    async_trait,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A reading reported by another agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub city: String,
    pub celsius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WeatherState {
    unit: String,
    readings: BTreeMap<String, f64>,
}

pub struct WeatherPlugin {
    unit: RwLock<String>,
    readings: RwLock<BTreeMap<String, f64>>,
    context: RwLock<Option<Arc<dyn AgentContext>>>,
    refreshes: AtomicU64,
    unhandled: AtomicU64,
}

impl Default for WeatherPlugin {
    fn default() -> Self {
        Self {
            unit: RwLock::new("celsius".to_string()),
            readings: RwLock::new(BTreeMap::new()),
            context: RwLock::new(None),
            refreshes: AtomicU64::new(0),
            unhandled: AtomicU64::new(0),
        }
    }
}

impl WeatherPlugin {
    fn convert(&self, celsius: f64) -> f64 {
        if self.unit.read().as_str() == "fahrenheit" {
            celsius * 9.0 / 5.0 + 32.0
        } else {
            celsius
        }
    }

    fn unit_symbol(&self) -> &'static str {
        if self.unit.read().as_str() == "fahrenheit" {
            "°F"
        } else {
            "°C"
        }
    }

    /// Number of completed `refresh` calls
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

/// Temperature readings per city.
#[agent_plugin(
    name = "Weather",
    version = "1.0",
    capabilities(units = "celsius,fahrenheit", streaming = false)
)]
impl WeatherPlugin {
    /// Human-readable forecast for a city
    #[agent_method(read_only)]
    async fn forecast(&self, city: String) -> PluginResult<String> {
        let celsius = self.temperature(city.clone()).await?;
        Ok(format!("{:.1}{} in {}", celsius, self.unit_symbol(), city))
    }

    #[agent_method(read_only)]
    async fn temperature(&self, city: String) -> PluginResult<f64> {
        let reading = self.readings.read().get(&city).copied();
        reading
            .map(|c| self.convert(c))
            .ok_or_else(|| PluginError::execution(format!("no reading for {}", city)))
    }

    #[agent_method(read_only)]
    async fn cities(&self) -> PluginResult<Vec<String>> {
        Ok(self.readings.read().keys().cloned().collect())
    }

    /// Record a reading in celsius; returns the number of known cities
    #[agent_method(name = "record")]
    async fn record_reading(&self, city: String, celsius: f64) -> PluginResult<usize> {
        let mut readings = self.readings.write();
        readings.insert(city, celsius);
        Ok(readings.len())
    }

    #[agent_method(name = "setUnit")]
    async fn set_unit(&self, unit: String) -> PluginResult<()> {
        match unit.as_str() {
            "celsius" | "fahrenheit" => {
                *self.unit.write() = unit;
                Ok(())
            }
            other => Err(PluginError::execution(format!("unknown unit {}", other))),
        }
    }

    #[agent_method(always_interleave)]
    async fn ping(&self) -> PluginResult<String> {
        Ok("pong".to_string())
    }

    #[agent_method(one_way)]
    async fn refresh(&self) -> PluginResult<()> {
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let context = self.context.read().clone();
        if let Some(context) = context {
            let event = AgentEvent::new("WeatherRefreshed", json!({ "count": count }))
                .with_source(context.agent_id());
            context.publish_event(event).await?;
        }
        Ok(())
    }

    #[event_handler("ReadingReported")]
    async fn on_reading(&self, reading: Reading) -> PluginResult<()> {
        self.readings.write().insert(reading.city, reading.celsius);
        Ok(())
    }

    #[event_handler]
    async fn on_other(&self, event: AgentEvent) -> PluginResult<()> {
        tracing::debug!(event_type = %event.event_type, "Weather plugin ignoring event");
        self.unhandled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PluginLifecycle for WeatherPlugin {
    async fn on_initialize(&self, context: Arc<dyn AgentContext>) -> PluginResult<()> {
        if let Some(unit) = context.config_str("unit") {
            self.set_unit(unit.to_string()).await?;
        }
        context.logger().info("Weather plugin initialized");
        *self.context.write() = Some(context);
        Ok(())
    }

    async fn on_dispose(&self) -> PluginResult<()> {
        self.context.write().take();
        Ok(())
    }

    async fn state(&self) -> PluginResult<Option<Value>> {
        let state = WeatherState {
            unit: self.unit.read().clone(),
            readings: self.readings.read().clone(),
        };
        Ok(Some(serde_json::to_value(state)?))
    }

    async fn restore_state(&self, state: Option<Value>) -> PluginResult<()> {
        match state {
            Some(value) => {
                let state: WeatherState = serde_json::from_value(value)?;
                *self.unit.write() = state.unit;
                *self.readings.write() = state.readings;
            }
            None => {
                self.readings.write().clear();
            }
        }
        Ok(())
    }
}

plugin_types::export_plugin_module!(WeatherPlugin => WeatherPlugin::default);

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_types::{AgentPlugin, PluginType};

    #[test]
    fn test_descriptor_from_attributes() {
        let descriptor = WeatherPlugin::plugin_descriptor();
        assert_eq!(descriptor.name, "Weather");
        assert_eq!(descriptor.version.as_deref(), Some("1.0"));
        assert_eq!(descriptor.description, "Temperature readings per city.");
        assert_eq!(descriptor.capability("streaming"), Some(&json!(false)));
        assert!(WeatherPlugin::TYPE_NAME.ends_with("::WeatherPlugin"));
    }

    #[test]
    fn test_routes_carry_declared_markers() {
        let plugin = WeatherPlugin::default();
        let routes = plugin.routes();

        let forecast = routes.iter().find(|r| r.method_name == "forecast").unwrap();
        assert!(forecast.is_read_only);
        assert!(!forecast.always_interleave);
        assert_eq!(forecast.parameter_types.len(), 1);

        let record = routes.iter().find(|r| r.method_name == "record").unwrap();
        assert_eq!(record.handler_name, "record_reading");
        assert!(!record.is_read_only);

        let ping = routes.iter().find(|r| r.method_name == "ping").unwrap();
        assert!(ping.always_interleave);

        let refresh = routes.iter().find(|r| r.method_name == "refresh").unwrap();
        assert!(refresh.one_way);
    }

    #[tokio::test]
    async fn test_execute_by_name_and_alias() {
        let plugin = WeatherPlugin::default();

        let count = plugin
            .execute_method("record", vec![json!("Oslo"), json!(4.5)])
            .await
            .unwrap();
        assert_eq!(count, json!(1));

        plugin
            .execute_method("record_reading", vec![json!("Rome"), json!("21")])
            .await
            .unwrap();

        let forecast = plugin
            .execute_method("forecast", vec![json!("Rome")])
            .await
            .unwrap();
        assert_eq!(forecast, json!("21.0°C in Rome"));
    }

    #[tokio::test]
    async fn test_execute_errors() {
        let plugin = WeatherPlugin::default();

        let err = plugin.execute_method("missing", vec![]).await.unwrap_err();
        assert!(matches!(err, PluginError::MethodNotFound(_)));

        let err = plugin.execute_method("forecast", vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::ParameterMismatch { expected: 1, actual: 0, .. }
        ));

        let err = plugin
            .execute_method("setUnit", vec![json!("kelvin")])
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Execution(_)));
    }

    #[tokio::test]
    async fn test_event_dispatch_prefers_specific_handler() {
        let plugin = WeatherPlugin::default();

        plugin
            .handle_event(AgentEvent::new(
                "ReadingReported",
                json!({ "city": "Lima", "celsius": 18.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(plugin.unhandled.load(Ordering::SeqCst), 0);

        plugin
            .handle_event(AgentEvent::new("SomethingElse", Value::Null))
            .await
            .unwrap();
        assert_eq!(plugin.unhandled.load(Ordering::SeqCst), 1);

        let cities = plugin.execute_method("cities", vec![]).await.unwrap();
        assert_eq!(cities, json!(["Lima"]));
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let plugin = WeatherPlugin::default();
        plugin
            .execute_method("record", vec![json!("Oslo"), json!(10.0)])
            .await
            .unwrap();
        plugin
            .execute_method("setUnit", vec![json!("fahrenheit")])
            .await
            .unwrap();

        let state = plugin.get_state().await.unwrap();

        let restored = WeatherPlugin::default();
        restored.set_state(state).await.unwrap();
        let temp = restored
            .execute_method("temperature", vec![json!("Oslo")])
            .await
            .unwrap();
        assert_eq!(temp, json!(50.0));
    }

    #[test]
    fn test_module_declaration() {
        assert!(AGENT_PLUGIN_MODULE.check_compatible().is_ok());
        assert_eq!(AGENT_PLUGIN_MODULE.exports.len(), 1);
        assert!(AGENT_PLUGIN_MODULE.exports[0].matches("WeatherPlugin"));
    }
}
