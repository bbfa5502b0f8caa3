use super::*;

fn categories(text: &str) -> Vec<AlertCategory> {
    screen(text).into_iter().map(|alert| alert.category).collect()
}

#[test]
fn ordinary_marketplace_chat_is_clean() {
    for text in ["is this still for sale?", "would you take 20?", "I can pick it up on Saturday", ""] {
        assert!(screen(text).is_empty(), "{text}");
    }
}

#[test]
fn invitation_to_another_messenger_is_high_severity() {
    let alerts = screen("Let's move to Telegram");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].category, AlertCategory::ExternalPlatform);
    assert_eq!(alerts[0].severity, Severity::High);
    assert!(alerts[0].pattern_matched.starts_with("(?i)let's"));
}

#[test]
fn messenger_handle_is_external_platform() {
    assert_eq!(categories("whatsapp: 4915123456"), vec![AlertCategory::ExternalPlatform]);
    assert_eq!(categories("my WeChat id is sam_88"), vec![AlertCategory::ExternalPlatform]);
}

#[test]
fn urgency_is_medium_severity() {
    let alerts = screen("I urgently need the money");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].category, AlertCategory::UrgencyPressure);
    assert_eq!(alerts[0].severity, Severity::Medium);

    assert_eq!(categories("please pay now, it is urgent"), vec![AlertCategory::UrgencyPressure]);
}

#[test]
fn amount_changes_are_flagged() {
    assert_eq!(categories("I changed the price"), vec![AlertCategory::SuspiciousAmounts]);
    assert_eq!(categories("send a different amount"), vec![AlertCategory::SuspiciousAmounts]);
}

#[test]
fn one_message_can_raise_several_alerts() {
    let found = categories("Let's chat on WhatsApp, I urgently need a different amount");
    assert!(found.contains(&AlertCategory::ExternalPlatform));
    assert!(found.contains(&AlertCategory::UrgencyPressure));
    assert!(found.contains(&AlertCategory::SuspiciousAmounts));
}

#[test]
fn alert_serializes_with_wire_names() {
    let alert = screen("urgent need").remove(0);
    let value = serde_json::to_value(&alert).expect("serialize alert");
    assert_eq!(value["type"], "urgency_pressure");
    assert_eq!(value["severity"], "medium");
    assert_eq!(value["pattern_matched"], "(?i)urgent(?:ly)? need");
    assert!(value["timestamp"].as_i64().is_some_and(|ts| ts > 0));
}
