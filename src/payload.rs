use serde_json::{Map, Value};

use crate::result::{Error, Result};

/// Either a literal string or a localization key with positional arguments, for any of
/// the alert fields (body/title/subtitle) and the action button label.
#[derive(Debug, Clone)]
enum AlertText {
    Literal(String),
    Localized { key: String, args: Vec<String> },
}

#[derive(Debug, Clone)]
enum SoundSpec {
    Name(String),
    Critical { name: String, critical: bool, volume: f64 },
}

#[derive(Debug, Clone)]
enum UrlArguments {
    Null,
    List(Vec<String>),
}

/// Builds an APNs JSON payload, enforcing the 4 KB (or caller-chosen) size budget by
/// shortening the alert body as a last resort (§4.1).
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    alert_body: Option<AlertText>,
    alert_title: Option<AlertText>,
    alert_subtitle: Option<AlertText>,
    show_action_button: Option<bool>,
    action_button: Option<AlertText>,
    sound: Option<SoundSpec>,
    badge: Option<u32>,
    category: Option<String>,
    content_available: bool,
    mutable_content: bool,
    thread_id: Option<String>,
    target_content_id: Option<String>,
    summary_argument: Option<String>,
    summary_argument_count: Option<u32>,
    url_arguments: Option<UrlArguments>,
    custom_properties: Map<String, Value>,
    prefer_string_alert: bool,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_alert_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.alert_body = Some(AlertText::Literal(body.into()));
        self
    }

    pub fn set_localized_alert_body(&mut self, key: impl Into<String>, args: Vec<String>) -> &mut Self {
        self.alert_body = Some(AlertText::Localized { key: key.into(), args });
        self
    }

    pub fn set_alert_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.alert_title = Some(AlertText::Literal(title.into()));
        self
    }

    pub fn set_localized_alert_title(&mut self, key: impl Into<String>, args: Vec<String>) -> &mut Self {
        self.alert_title = Some(AlertText::Localized { key: key.into(), args });
        self
    }

    pub fn set_alert_subtitle(&mut self, subtitle: impl Into<String>) -> &mut Self {
        self.alert_subtitle = Some(AlertText::Literal(subtitle.into()));
        self
    }

    pub fn set_localized_alert_subtitle(&mut self, key: impl Into<String>, args: Vec<String>) -> &mut Self {
        self.alert_subtitle = Some(AlertText::Localized { key: key.into(), args });
        self
    }

    /// `false` hides the action button entirely (`action-loc-key: null`); `true` shows
    /// it, using the localized action key if one has been set.
    pub fn set_show_action_button(&mut self, show: bool) -> &mut Self {
        self.show_action_button = Some(show);
        self
    }

    /// Mutually exclusive with [`Self::set_localized_action_button_key`] — last writer wins.
    pub fn set_action_button_label(&mut self, label: impl Into<String>) -> &mut Self {
        self.action_button = Some(AlertText::Literal(label.into()));
        self
    }

    /// Mutually exclusive with [`Self::set_action_button_label`] — last writer wins.
    pub fn set_localized_action_button_key(&mut self, key: impl Into<String>, args: Vec<String>) -> &mut Self {
        self.action_button = Some(AlertText::Localized { key: key.into(), args });
        self
    }

    pub fn set_sound(&mut self, name: impl Into<String>) -> Result<&mut Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_argument("sound name must not be empty"));
        }
        self.sound = Some(SoundSpec::Name(name));
        Ok(self)
    }

    pub fn set_critical_sound(&mut self, name: impl Into<String>, critical: bool, volume: f64) -> Result<&mut Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_argument("sound name must not be empty"));
        }
        if volume.is_nan() || !(0.0..=1.0).contains(&volume) {
            return Err(Error::invalid_argument("sound volume must be within 0.0..=1.0"));
        }
        self.sound = Some(SoundSpec::Critical { name, critical, volume });
        Ok(self)
    }

    pub fn set_badge_number(&mut self, badge: u32) -> &mut Self {
        self.badge = Some(badge);
        self
    }

    pub fn set_category_name(&mut self, category: impl Into<String>) -> &mut Self {
        self.category = Some(category.into());
        self
    }

    pub fn set_content_available(&mut self, content_available: bool) -> &mut Self {
        self.content_available = content_available;
        self
    }

    pub fn set_mutable_content(&mut self, mutable_content: bool) -> &mut Self {
        self.mutable_content = mutable_content;
        self
    }

    pub fn set_thread_id(&mut self, thread_id: impl Into<String>) -> &mut Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn set_target_content_id(&mut self, target_content_id: impl Into<String>) -> &mut Self {
        self.target_content_id = Some(target_content_id.into());
        self
    }

    pub fn set_summary_argument(&mut self, summary_argument: impl Into<String>) -> &mut Self {
        self.summary_argument = Some(summary_argument.into());
        self
    }

    pub fn set_summary_argument_count(&mut self, count: u32) -> Result<&mut Self> {
        if count == 0 {
            return Err(Error::invalid_argument("summary-argument-count must be greater than 0"));
        }
        self.summary_argument_count = Some(count);
        Ok(self)
    }

    pub fn set_url_arguments(&mut self, args: Option<Vec<String>>) -> &mut Self {
        self.url_arguments = Some(match args {
            Some(list) => UrlArguments::List(list),
            None => UrlArguments::Null,
        });
        self
    }

    pub fn add_custom_property(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.custom_properties.insert(key.into(), value.into());
        self
    }

    /// When only a literal alert body is set (no title, subtitle, action or localized
    /// form), emit `aps.alert` as a bare string instead of a one-key object.
    ///
    /// Per an open question in the source spec, this preference is ignored whenever any
    /// localized field is present — the localized form is always kept as a dictionary.
    pub fn prefer_string_representation_for_alerts(&mut self, prefer: bool) -> &mut Self {
        self.prefer_string_alert = prefer;
        self
    }

    fn has_non_body_alert_fields(&self) -> bool {
        self.alert_title.is_some()
            || self.alert_subtitle.is_some()
            || self.show_action_button.is_some()
            || self.action_button.is_some()
            || self.summary_argument.is_some()
            || self.summary_argument_count.is_some()
    }

    fn is_localized(&self) -> bool {
        matches!(self.alert_body, Some(AlertText::Localized { .. }))
            || matches!(self.alert_title, Some(AlertText::Localized { .. }))
            || matches!(self.alert_subtitle, Some(AlertText::Localized { .. }))
            || matches!(self.action_button, Some(AlertText::Localized { .. }))
    }

    /// Builds the alert field, given an override for the body text (used by the
    /// size-shortening pass in [`Self::build`]).
    fn build_alert(&self, body_override: Option<&str>) -> Option<Value> {
        if self.alert_body.is_none() && !self.has_non_body_alert_fields() {
            return None;
        }

        if self.prefer_string_alert && !self.is_localized() && !self.has_non_body_alert_fields() {
            if let Some(AlertText::Literal(body)) = &self.alert_body {
                let body = body_override.unwrap_or(body);
                return Some(Value::String(body.to_string()));
            }
        }

        let mut alert = Map::new();

        match &self.alert_body {
            Some(AlertText::Literal(body)) => {
                let body = body_override.unwrap_or(body);
                alert.insert("body".into(), Value::String(body.to_string()));
            }
            Some(AlertText::Localized { key, args }) => {
                alert.insert("loc-key".into(), Value::String(key.clone()));
                if !args.is_empty() {
                    alert.insert("loc-args".into(), string_array(args));
                }
            }
            None => {}
        }

        match &self.alert_title {
            Some(AlertText::Literal(title)) => {
                alert.insert("title".into(), Value::String(title.clone()));
            }
            Some(AlertText::Localized { key, args }) => {
                alert.insert("title-loc-key".into(), Value::String(key.clone()));
                if !args.is_empty() {
                    alert.insert("title-loc-args".into(), string_array(args));
                }
            }
            None => {}
        }

        match &self.alert_subtitle {
            Some(AlertText::Literal(subtitle)) => {
                alert.insert("subtitle".into(), Value::String(subtitle.clone()));
            }
            Some(AlertText::Localized { key, args }) => {
                alert.insert("subtitle-loc-key".into(), Value::String(key.clone()));
                if !args.is_empty() {
                    alert.insert("subtitle-loc-args".into(), string_array(args));
                }
            }
            None => {}
        }

        if self.show_action_button == Some(false) {
            alert.insert("action-loc-key".into(), Value::Null);
        } else {
            match &self.action_button {
                Some(AlertText::Localized { key, args }) => {
                    alert.insert("action-loc-key".into(), Value::String(key.clone()));
                    if !args.is_empty() {
                        alert.insert("action-loc-args".into(), string_array(args));
                    }
                }
                Some(AlertText::Literal(label)) => {
                    alert.insert("action-loc-key".into(), Value::String(label.clone()));
                }
                None => {}
            }
        }

        if let Some(summary_argument) = &self.summary_argument {
            alert.insert("summary-arg".into(), Value::String(summary_argument.clone()));
        }
        if let Some(count) = self.summary_argument_count {
            alert.insert("summary-arg-count".into(), Value::Number(count.into()));
        }

        Some(Value::Object(alert))
    }

    fn build_aps(&self, body_override: Option<&str>) -> Map<String, Value> {
        let mut aps = Map::new();

        if let Some(alert) = self.build_alert(body_override) {
            aps.insert("alert".into(), alert);
        }
        if let Some(badge) = self.badge {
            aps.insert("badge".into(), Value::Number(badge.into()));
        }
        match &self.sound {
            Some(SoundSpec::Name(name)) => {
                aps.insert("sound".into(), Value::String(name.clone()));
            }
            Some(SoundSpec::Critical { name, critical, volume }) => {
                let mut sound = Map::new();
                sound.insert("critical".into(), Value::Number((*critical as u8).into()));
                sound.insert("name".into(), Value::String(name.clone()));
                sound.insert(
                    "volume".into(),
                    Value::Number(serde_json::Number::from_f64(*volume).unwrap_or_else(|| 0.into())),
                );
                aps.insert("sound".into(), Value::Object(sound));
            }
            None => {}
        }
        if let Some(category) = &self.category {
            aps.insert("category".into(), Value::String(category.clone()));
        }
        if self.content_available {
            aps.insert("content-available".into(), Value::Number(1.into()));
        }
        if self.mutable_content {
            aps.insert("mutable-content".into(), Value::Number(1.into()));
        }
        if let Some(thread_id) = &self.thread_id {
            aps.insert("thread-id".into(), Value::String(thread_id.clone()));
        }
        if let Some(target_content_id) = &self.target_content_id {
            aps.insert("target-content-id".into(), Value::String(target_content_id.clone()));
        }
        match &self.url_arguments {
            Some(UrlArguments::Null) => {
                aps.insert("url-args".into(), Value::Null);
            }
            Some(UrlArguments::List(list)) => {
                aps.insert("url-args".into(), string_array(list));
            }
            None => {}
        }

        aps
    }

    fn assemble(&self, body_override: Option<&str>) -> Value {
        let mut root = self.custom_properties.clone();
        root.insert("aps".into(), Value::Object(self.build_aps(body_override)));
        Value::Object(root)
    }

    /// Serialises the payload, shortening the alert body (by trimming trailing code
    /// points) until it fits within `max_bytes`. Fails with
    /// [`Error::PayloadTooLarge`] if the skeleton alone — the payload with an empty
    /// alert body — already exceeds the budget.
    pub fn build(&self, max_bytes: usize) -> Result<String> {
        let full = serde_json::to_string(&self.assemble(None))?;
        if full.len() <= max_bytes {
            return Ok(full);
        }

        let body = match &self.alert_body {
            Some(AlertText::Literal(body)) => body.as_str(),
            _ => {
                // Nothing shortenable: the skeleton itself is over budget.
                let skeleton = serde_json::to_string(&self.assemble(Some("")))?;
                return Err(Error::PayloadTooLarge { skeleton_bytes: skeleton.len(), max_bytes });
            }
        };

        let skeleton = serde_json::to_string(&self.assemble(Some("")))?;
        let skeleton_bytes = skeleton.len();
        if skeleton_bytes > max_bytes {
            return Err(Error::PayloadTooLarge { skeleton_bytes, max_bytes });
        }

        let budget_for_body = max_bytes - skeleton_bytes;
        let mut kept_chars = 0;
        let mut used = 0usize;
        for c in body.chars() {
            let cost = size_of_json_escaped_utf8_char(c);
            if used + cost > budget_for_body {
                break;
            }
            used += cost;
            kept_chars += 1;
        }

        let shortened: String = body.chars().take(kept_chars).collect();
        let result = serde_json::to_string(&self.assemble(Some(&shortened)))?;
        debug_assert!(result.len() <= max_bytes);
        Ok(result)
    }

    /// Builds the verbatim `{"mdm": "<magic>"}` payload used for MDM push notifications.
    /// Not subject to the size budget.
    pub fn build_mdm_payload(magic: impl Into<String>) -> String {
        let mut root = Map::new();
        root.insert("mdm".into(), Value::String(magic.into()));
        serde_json::to_string(&Value::Object(root)).expect("a string-valued map always serialises")
    }
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

/// The number of bytes a single code point contributes when JSON-encoded inside a
/// string literal — i.e. `len(json_encode(string(c))) - 2`, the `-2` accounting for the
/// surrounding quotes. Matches `serde_json`'s escaping table: quote, backslash and the
/// short C0 escapes cost 2 bytes, other control characters cost 6 (`\u00XX`), and
/// everything else (including all non-ASCII code points) passes through as raw UTF-8.
pub fn size_of_json_escaped_utf8_char(c: char) -> usize {
    match c {
        '"' | '\\' | '\u{8}' | '\u{c}' | '\n' | '\r' | '\t' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_body_emits_bare_string_with_preference() {
        let mut builder = PayloadBuilder::new();
        builder.set_alert_body("hi").prefer_string_representation_for_alerts(true);
        let json = builder.build(usize::MAX).unwrap();
        assert_eq!(json, r#"{"aps":{"alert":"hi"}}"#);
    }

    #[test]
    fn plain_body_without_preference_is_an_object() {
        let mut builder = PayloadBuilder::new();
        builder.set_alert_body("hi");
        let json = builder.build(usize::MAX).unwrap();
        assert_eq!(json, r#"{"aps":{"alert":{"body":"hi"}}}"#);
    }

    #[test]
    fn localized_body_ignores_the_string_preference() {
        let mut builder = PayloadBuilder::new();
        builder
            .set_localized_alert_body("GREETING", vec!["World".into()])
            .prefer_string_representation_for_alerts(true);
        let json = builder.build(usize::MAX).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert!(value["aps"]["alert"].is_object());
        assert_eq!(value["aps"]["alert"]["loc-key"], "GREETING");
    }

    #[test]
    fn hidden_action_button_emits_null_key() {
        let mut builder = PayloadBuilder::new();
        builder.set_alert_body("hi").set_show_action_button(false);
        let json = builder.build(usize::MAX).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert!(value["aps"]["alert"]["action-loc-key"].is_null());
    }

    #[test]
    fn action_button_label_and_localized_key_are_mutually_exclusive() {
        let mut builder = PayloadBuilder::new();
        builder.set_alert_body("hi");
        builder.set_action_button_label("Reply");
        builder.set_localized_action_button_key("REPLY_KEY", vec![]);
        let json = builder.build(usize::MAX).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["aps"]["alert"]["action-loc-key"], "REPLY_KEY");
    }

    #[test]
    fn content_available_emits_one() {
        let mut builder = PayloadBuilder::new();
        builder.set_content_available(true);
        let json = builder.build(usize::MAX).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["aps"]["content-available"], 1);
    }

    #[test]
    fn critical_sound_rejects_out_of_range_volume() {
        let mut builder = PayloadBuilder::new();
        assert!(builder.set_critical_sound("siren.caf", true, 1.5).is_err());
        assert!(builder.set_critical_sound("siren.caf", true, f64::NAN).is_err());
    }

    #[test]
    fn summary_argument_count_rejects_zero() {
        let mut builder = PayloadBuilder::new();
        assert!(builder.set_summary_argument_count(0).is_err());
    }

    #[test]
    fn custom_properties_sit_alongside_aps() {
        let mut builder = PayloadBuilder::new();
        builder.set_alert_body("hi").add_custom_property("order-id", "42");
        let json = builder.build(usize::MAX).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["order-id"], "42");
        assert!(value["aps"].is_object());
    }

    #[test]
    fn mdm_payload_is_verbatim() {
        assert_eq!(
            PayloadBuilder::build_mdm_payload("abc123"),
            r#"{"mdm":"abc123"}"#
        );
    }

    #[test]
    fn shortening_keeps_a_code_point_prefix_and_hits_the_budget() {
        let mut builder = PayloadBuilder::new();
        let body: String = std::iter::repeat('x').take(200).collect();
        builder.set_alert_body(body.clone());
        let json = builder.build(128).unwrap();
        assert_eq!(json.len(), 128);
        let value: Value = serde_json::from_str(&json).unwrap();
        let shortened = value["aps"]["alert"]["body"].as_str().unwrap();
        assert!(body.starts_with(shortened));
    }

    #[test]
    fn build_is_a_fixed_point_at_unbounded_budget() {
        let mut builder = PayloadBuilder::new();
        builder.set_alert_body("hello world");
        let once = builder.build(usize::MAX).unwrap();
        let twice = builder.build(usize::MAX).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn impossible_budget_fails_with_payload_too_large() {
        let mut builder = PayloadBuilder::new();
        builder.set_alert_body("hi").add_custom_property("padding", "x".repeat(100));
        let err = builder.build(5).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
    }

    #[test]
    fn escaped_char_size_matches_json_encoding() {
        for c in ['a', '"', '\\', '\n', '\t', '\u{1}', '€', '😀'] {
            let encoded = serde_json::to_string(&c.to_string()).unwrap();
            assert_eq!(size_of_json_escaped_utf8_char(c), encoded.len() - 2);
        }
    }
}
