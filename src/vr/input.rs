use crate::vr::Posef;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const OCULUS_TOUCH_PROFILE: &str = "/interaction_profiles/oculus/touch_controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Boolean,
    Float,
    Pose,
}

/// One row of the action table: an action name bound to a device input path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ActionBinding {
    pub name: &'static str,
    pub path: &'static str,
    pub kind: ActionKind,
}

impl ActionBinding {
    pub const fn new(name: &'static str, path: &'static str, kind: ActionKind) -> Self {
        Self { name, path, kind }
    }
}

use ActionKind::{Boolean, Float, Pose};

pub const DEFAULT_BINDINGS: &[ActionBinding] = &[
    ActionBinding::new("left_squeeze", "/user/hand/left/input/squeeze/value", Float),
    ActionBinding::new("right_squeeze", "/user/hand/right/input/squeeze/value", Float),
    ActionBinding::new("left_trigger", "/user/hand/left/input/trigger/value", Float),
    ActionBinding::new("right_trigger", "/user/hand/right/input/trigger/value", Float),
    ActionBinding::new("left_trigger_touch", "/user/hand/left/input/trigger/touch", Boolean),
    ActionBinding::new("right_trigger_touch", "/user/hand/right/input/trigger/touch", Boolean),
    ActionBinding::new("left_thumbstick_x", "/user/hand/left/input/thumbstick/x", Float),
    ActionBinding::new("left_thumbstick_y", "/user/hand/left/input/thumbstick/y", Float),
    ActionBinding::new("right_thumbstick_x", "/user/hand/right/input/thumbstick/x", Float),
    ActionBinding::new("right_thumbstick_y", "/user/hand/right/input/thumbstick/y", Float),
    ActionBinding::new("left_thumbstick_click", "/user/hand/left/input/thumbstick/click", Boolean),
    ActionBinding::new("right_thumbstick_click", "/user/hand/right/input/thumbstick/click", Boolean),
    ActionBinding::new("left_thumbstick_touch", "/user/hand/left/input/thumbstick/touch", Boolean),
    ActionBinding::new("right_thumbstick_touch", "/user/hand/right/input/thumbstick/touch", Boolean),
    ActionBinding::new("x_click", "/user/hand/left/input/x/click", Boolean),
    ActionBinding::new("x_touch", "/user/hand/left/input/x/touch", Boolean),
    ActionBinding::new("y_click", "/user/hand/left/input/y/click", Boolean),
    ActionBinding::new("y_touch", "/user/hand/left/input/y/touch", Boolean),
    ActionBinding::new("a_click", "/user/hand/right/input/a/click", Boolean),
    ActionBinding::new("a_touch", "/user/hand/right/input/a/touch", Boolean),
    ActionBinding::new("b_click", "/user/hand/right/input/b/click", Boolean),
    ActionBinding::new("b_touch", "/user/hand/right/input/b/touch", Boolean),
    ActionBinding::new("menu_click", "/user/hand/left/input/menu/click", Boolean),
    ActionBinding::new("system_click", "/user/hand/right/input/system/click", Boolean),
    ActionBinding::new("left_grip_pose", "/user/hand/left/input/grip/pose", Pose),
    ActionBinding::new("right_grip_pose", "/user/hand/right/input/grip/pose", Pose),
    ActionBinding::new("left_aim_pose", "/user/hand/left/input/aim/pose", Pose),
    ActionBinding::new("right_aim_pose", "/user/hand/right/input/aim/pose", Pose),
];

static BINDINGS_BY_NAME: Lazy<HashMap<&'static str, &'static ActionBinding>> = Lazy::new(|| {
    DEFAULT_BINDINGS
        .iter()
        .map(|binding| (binding.name, binding))
        .collect()
});

/// Looks up a row of [`DEFAULT_BINDINGS`] by action name.
pub fn binding(name: &str) -> Option<&'static ActionBinding> {
    BINDINGS_BY_NAME.get(name).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActionValue {
    Bool(bool),
    Float(f32),
    Pose(Option<Posef>),
}

/// Action values read during one poll, keyed by action name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputSnapshot {
    pub display_time: i64,
    pub values: BTreeMap<String, ActionValue>,
}

impl InputSnapshot {
    pub fn new(display_time: i64) -> Self {
        Self {
            display_time,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, value: ActionValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn bool_value(&self, name: &str) -> Option<bool> {
        match self.values.get(name)? {
            ActionValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn float_value(&self, name: &str) -> Option<f32> {
        match self.values.get(name)? {
            ActionValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn pose(&self, name: &str) -> Option<Posef> {
        match self.values.get(name)? {
            ActionValue::Pose(pose) => *pose,
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}
