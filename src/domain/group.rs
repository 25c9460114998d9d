/// A room groups devices directly; membership is resolved from the bridge's
/// `children` and `services` references.
#[derive(PartialEq, Clone, Debug)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub archetype: String,
    pub device_ids: Vec<String>,
}

/// A zone groups devices and rooms; room references contribute the room's
/// member devices, one level deep.
#[derive(PartialEq, Clone, Debug)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub archetype: String,
    pub device_ids: Vec<String>,
}

#[derive(PartialEq, Clone, Debug)]
pub struct Scene {
    pub id: String,
    pub name: String,
    /// Room or zone the scene belongs to, if the bridge reported one.
    pub group_id: Option<String>,
    pub state: SceneState,
    pub supports_dynamic: bool,
}

/// Whether a scene is currently recalled, and in which mode.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum SceneState {
    Inactive,
    ActiveStatic,
    ActiveDynamic,
}

impl SceneState {
    /// Maps the bridge's `status.active` value; anything unrecognized (or a
    /// missing status block) counts as inactive.
    pub fn parse(active: Option<&str>) -> SceneState {
        match active {
            Some("dynamic_palette") | Some("dynamic") => SceneState::ActiveDynamic,
            Some("static") | Some("active") => SceneState::ActiveStatic,
            _ => SceneState::Inactive,
        }
    }
}
