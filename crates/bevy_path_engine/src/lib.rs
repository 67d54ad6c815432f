//! Bevy integration for the pathfinding engine.
//!
//! Inserts [`PathEngine`] as a resource and pumps [`Engine::tick`] every
//! `Update`, so path callbacks fire on the main schedule and graph updates
//! apply inside the engine's own blocked windows. Graphs are registered by
//! user systems through the resource:
//!
//! ```no_run
//! use bevy_app::App;
//! use bevy_path_engine::{PathEngine, PathEnginePlugin};
//! use path_engine::{EngineConfig, GridCell, GridGraph, ThreadCount};
//!
//! let mut app = App::new();
//! app.add_plugins(PathEnginePlugin::default());
//! let mut engine = app.world_mut().resource_mut::<PathEngine>();
//! engine.add_graph(Box::new(GridGraph::from_fn(
//!   64,
//!   64,
//!   1.0,
//!   glam::Vec3::ZERO,
//!   |_, _| GridCell::walkable(),
//! )));
//! engine.scan();
//! ```

use bevy_app::{App, Plugin, Update};
use bevy_ecs::prelude::*;
use path_engine::{Engine, EngineConfig};

/// The engine as a Bevy resource. Derefs to [`Engine`].
#[derive(Resource)]
pub struct PathEngine(pub Engine);

impl std::ops::Deref for PathEngine {
  type Target = Engine;

  fn deref(&self) -> &Engine {
    &self.0
  }
}

impl std::ops::DerefMut for PathEngine {
  fn deref_mut(&mut self) -> &mut Engine {
    &mut self.0
  }
}

/// Plugin owning the engine lifecycle.
///
/// Worker threads start when the plugin builds and are joined when the
/// `PathEngine` resource drops with the app.
#[derive(Default)]
pub struct PathEnginePlugin {
  /// Engine configuration used at startup.
  pub config: EngineConfig,
}

impl PathEnginePlugin {
  /// Creates the plugin with a specific configuration.
  pub fn with_config(config: EngineConfig) -> Self {
    Self { config }
  }
}

impl Plugin for PathEnginePlugin {
  fn build(&self, app: &mut App) {
    app.insert_resource(PathEngine(Engine::new(self.config.clone())));
    app.add_systems(Update, pump_path_engine);
  }
}

/// System: advances the engine one tick.
fn pump_path_engine(mut engine: ResMut<PathEngine>) {
  engine.tick();
}
