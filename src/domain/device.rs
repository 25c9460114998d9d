use crate::domain::channel::Channel;
use serde_json::Value;

#[derive(PartialEq, Clone, Debug)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub class: DeviceClass,
    pub manufacturer: String,
    pub model_id: String,
    pub product_name: String,
    pub software_version: String,
    pub has_battery: bool,
    pub channels: Vec<Channel>,
    pub effects: Vec<Effect>,
    /// Vendor metadata, merged additively from the device resource and its
    /// bound capability resources. Opaque to the engine.
    pub meta: Value,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum DeviceClass {
    Unknown,
    Light,
    Plug,
    Sensor,
    Switch,
    Button,
    Gateway,
}

impl Device {
    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == channel_id)
    }
}

/// A lighting effect a device can run, with the vendor id preserved for
/// invocation and a normalized kind for cross-vendor grouping.
#[derive(PartialEq, Clone, Debug)]
pub struct Effect {
    pub id: String,
    pub label: String,
    pub kind: EffectKind,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum EffectKind {
    Candle,
    Fireplace,
    Sparkle,
    ColorLoop,
    Relax,
    Vendor,
}

impl EffectKind {
    pub fn from_effect_id(id: &str) -> EffectKind {
        let normalized = id.to_lowercase();
        match normalized.as_str() {
            "candle" => EffectKind::Candle,
            "fire" | "fireplace" | "sunbeam" => EffectKind::Fireplace,
            "sparkle" | "glisten" | "opal" | "prism" | "underwater" | "enchant" | "cosmos" => EffectKind::Sparkle,
            "sunrise" | "sunset" => EffectKind::Relax,
            _ if normalized == "colorloop" || normalized.contains("palette") => EffectKind::ColorLoop,
            _ => EffectKind::Vendor,
        }
    }
}

/// Turns a vendor effect id such as `cosmos_twinkle` into a display label.
pub fn beautify_effect_label(id: &str) -> String {
    id.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("candle", EffectKind::Candle)]
    #[case("Fire", EffectKind::Fireplace)]
    #[case("sunbeam", EffectKind::Fireplace)]
    #[case("opal", EffectKind::Sparkle)]
    #[case("colorloop", EffectKind::ColorLoop)]
    #[case("dynamic_palette", EffectKind::ColorLoop)]
    #[case("sunrise", EffectKind::Relax)]
    #[case("lake_placid", EffectKind::Vendor)]
    fn classifies_effect_ids(#[case] id: &str, #[case] expected: EffectKind) {
        assert_eq!(EffectKind::from_effect_id(id), expected);
    }

    #[rstest]
    #[case("candle", "Candle")]
    #[case("cosmos_twinkle", "Cosmos Twinkle")]
    #[case("dynamic-palette", "Dynamic Palette")]
    #[case("__x", "X")]
    fn beautifies_effect_labels(#[case] id: &str, #[case] expected: &str) {
        assert_eq!(beautify_effect_label(id), expected);
    }
}
