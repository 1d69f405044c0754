//! End-to-end: discovery, hosting, events and journal recovery with the
//! weather plugin served through the static module backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use plugin_runtime::plugin_types::{AgentEvent, AgentReference, AgentReferenceExt, PluginError};
use plugin_runtime::{
    FileJournal, HostConfig, HostPhase, LoaderConfig, ModuleBackend, PluginHostFactory,
    PluginLoader, StaticModuleBackend,
};
use serde_json::{Value, json};
use tempfile::TempDir;

fn write_weather_unit(plugins_dir: &Path) {
    let dir = plugins_dir.join("Weather");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(format!("Weather.{}", StaticModuleBackend::EXTENSION)),
        StaticModuleBackend::unit_for("weather"),
    )
    .unwrap();
}

fn loader(root: &Path) -> Arc<PluginLoader> {
    let backend =
        StaticModuleBackend::new().with_module("weather", &weather_plugin::AGENT_PLUGIN_MODULE);
    let backends: Vec<Arc<dyn ModuleBackend>> = vec![Arc::new(backend)];
    let config = LoaderConfig::new(root.join("plugins")).with_shadow_dir(root.join("shadow"));
    Arc::new(PluginLoader::new(config, backends))
}

fn factory(root: &Path) -> PluginHostFactory {
    let journal = Arc::new(FileJournal::new(root.join("journal")));
    PluginHostFactory::new(loader(root), journal, HostConfig::default())
}

fn setup() -> TempDir {
    let root = TempDir::new().unwrap();
    write_weather_unit(&root.path().join("plugins"));
    root
}

#[tokio::test]
async fn test_discovery_lists_weather() {
    let root = setup();
    let loader = loader(root.path());

    let found = loader.discover().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key(), "Weather:1.0");
    assert_eq!(found[0].description, "Temperature readings per city.");
    assert_eq!(loader.available(), found);
}

#[tokio::test]
async fn test_hosted_weather_round_trip() {
    let root = setup();
    let factory = factory(root.path());

    let station = factory.create("station", "Weather", None, None).await.unwrap();
    assert_eq!(
        station
            .call_method("record", vec![json!("Oslo"), json!(4.5)])
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        station.call_method("forecast", vec![json!("Oslo")]).await.unwrap(),
        "4.5°C in Oslo"
    );

    let reference = factory.reference("station");
    let cities: Vec<String> = reference.call("cities", vec![]).await.unwrap();
    assert_eq!(cities, vec!["Oslo"]);

    let err = reference
        .call_method("temperature", vec![json!("Lima")])
        .await
        .unwrap_err();
    assert!(matches!(&err, PluginError::AgentMethodCall { agent_id, .. } if agent_id == "station"));
    assert!(matches!(err.root_cause(), PluginError::Execution(_)));
}

#[tokio::test]
async fn test_journal_recovers_configuration_and_state() {
    let root = setup();

    {
        let factory = factory(root.path());
        let station = factory
            .create("station", "Weather", None, json!({"unit": "fahrenheit"}).as_object().cloned())
            .await
            .unwrap();
        station
            .call_method("record", vec![json!("Rome"), json!(20.0)])
            .await
            .unwrap();
        let state = station.get_state().await.unwrap();
        station.set_state(state).await.unwrap();
        factory.dispose_all().await;
    }

    let factory = factory(root.path());
    let station = factory.activate("station").await.unwrap();
    assert_eq!(station.phase(), HostPhase::Configured);
    assert_eq!(
        station.call_method("temperature", vec![json!("Rome")]).await.unwrap(),
        68.0
    );
    assert!(root.path().join("journal").join("station.jsonl").is_file());
}

#[tokio::test]
async fn test_events_flow_through_the_bus() {
    let root = setup();
    let factory = factory(root.path());
    let env = factory.environment();

    let station = factory.create("station", "Weather", None, None).await.unwrap();
    station
        .call_method("setUnit", vec![json!("celsius")])
        .await
        .unwrap();

    env.topology.subscribe("station", &["sensor".to_string()]);
    env.bus.publish(
        "sensor",
        AgentEvent::new("ReadingReported", json!({"city": "Lima", "celsius": 18.0})),
    );

    let mut delivered = false;
    for _ in 0..50 {
        let cities = station.call_method("cities", vec![]).await.unwrap();
        if cities == json!(["Lima"]) {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered);

    let mut events = env.bus.subscribe();
    assert_eq!(station.call_method("refresh", vec![]).await.unwrap(), Value::Null);
    let envelope = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.publisher, "station");
    assert_eq!(envelope.event.event_type, "WeatherRefreshed");
    assert_eq!(envelope.event.source_agent_id.as_deref(), Some("station"));

    factory.dispose_all().await;
    assert!(station.is_disposed());
}

#[tokio::test]
async fn test_reload_keeps_host_identity() {
    let root = setup();
    let factory = factory(root.path());

    let station = factory.create("station", "Weather", None, None).await.unwrap();
    station
        .call_method("record", vec![json!("Oslo"), json!(1.0)])
        .await
        .unwrap();

    station.reload().await.unwrap();
    assert_eq!(station.phase(), HostPhase::Loaded);

    // No state was persisted, so the fresh instance starts empty
    let cities = station.call_method("cities", vec![]).await.unwrap();
    assert_eq!(cities, json!([]));
    assert!(factory.environment().registry.contains("station"));
}
