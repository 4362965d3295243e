//! Escalation controller scenarios with scripted tiers.

mod common;

use std::time::Duration;

use common::{ScriptedCapability, Step};
use serde_json::json;
use tierwise_core::{
    brand_separation_policy, AgentTier, EscalationController, EscalationOutcome, PipelineConfig,
    TierFailure,
};

const EMPTY_MOTIVO: &str = r#"Aquí está el resultado:
```json
{
  "anio_separacion": "2003",
  "motivo": "   ",
  "marca_original": "La Vaquita",
  "marcas_resultantes": [{"marca": "Supermu", "dueños": "Familia Ruiz"}]
}
```"#;

const COMPLETE: &str = r#"Según las fuentes consultadas, {"anio_separacion": "2003",
"motivo": "desacuerdo entre socios", "marca_original": "La Vaquita",
"marcas_resultantes": [{"marca": "Supermu", "dueños": "Familia Ruiz"},
{"marca": "Vaquita Express", "dueños": "Grupo Norte"}]} Espero que sirva."#;

fn tier(cap: &ScriptedCapability) -> AgentTier {
    AgentTier::new(cap.shared(), Duration::from_secs(30))
}

#[tokio::test]
async fn incomplete_first_tier_escalates_to_second() {
    let fast = ScriptedCapability::new("fast", vec![Step::text(EMPTY_MOTIVO)]);
    let strong = ScriptedCapability::new("strong", vec![Step::text(COMPLETE)]);

    let controller =
        EscalationController::new(vec![tier(&fast), tier(&strong)], brand_separation_policy())
            .unwrap();
    let outcome = controller.run("¿Por qué se separó La Vaquita?").await;

    match &outcome {
        EscalationOutcome::Succeeded {
            tier,
            payload,
            verdict,
            failed_tiers,
        } => {
            assert_eq!(*tier, 1);
            assert!(verdict.passed);
            assert_eq!(payload.value["motivo"], "desacuerdo entre socios");
            assert_eq!(failed_tiers.len(), 1);
            match &failed_tiers[0].failure {
                TierFailure::Incomplete { failed_fields, .. } => {
                    assert_eq!(failed_fields, &vec!["motivo".to_string()]);
                }
                other => panic!("expected Incomplete, got {other:?}"),
            }
        }
        other => panic!("expected Succeeded, got {other:?}"),
    }

    assert_eq!(fast.call_count(), 1);
    assert_eq!(strong.call_count(), 1);
    assert_eq!(
        strong.prompts().await,
        vec!["¿Por qué se separó La Vaquita?".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn both_tiers_timing_out_exhausts_with_both_indices() {
    let fast = ScriptedCapability::new("fast", vec![Step::Hang]);
    let strong = ScriptedCapability::new("strong", vec![Step::Hang]);

    let controller =
        EscalationController::new(vec![tier(&fast), tier(&strong)], brand_separation_policy())
            .unwrap();
    let outcome = controller.run("q").await;

    assert!(outcome.payload().is_none());
    let EscalationOutcome::Exhausted(err) = &outcome else {
        panic!("expected Exhausted, got {outcome:?}");
    };
    let tiers: Vec<usize> = err.attempts.iter().map(|a| a.tier).collect();
    assert_eq!(tiers, vec![0, 1]);
    assert!(err.attempts.iter().all(|a| a.failure.is_timeout()));

    let diagnostic = outcome.diagnostic();
    assert!(diagnostic.contains("tier 0 (fast)"), "{diagnostic}");
    assert!(diagnostic.contains("tier 1 (strong)"), "{diagnostic}");
    assert!(diagnostic.contains("timed out after 30000ms"), "{diagnostic}");
}

#[tokio::test]
async fn first_success_wins_and_later_tiers_are_never_called() {
    let fast = ScriptedCapability::new("fast", vec![Step::text(COMPLETE)]);
    let strong = ScriptedCapability::new("strong", vec![Step::text(COMPLETE)]);

    let controller =
        EscalationController::new(vec![tier(&fast), tier(&strong)], brand_separation_policy())
            .unwrap();
    let outcome = controller.run("q").await;

    assert!(matches!(outcome, EscalationOutcome::Succeeded { tier: 0, .. }));
    assert_eq!(strong.call_count(), 0);
}

#[tokio::test]
async fn report_tier_receives_pretty_payload() {
    let fast = ScriptedCapability::new("fast", vec![Step::text(COMPLETE)]);
    let writer = ScriptedCapability::new(
        "writer",
        vec![Step::text("En 2003, La Vaquita se dividió en dos marcas.")],
    );

    let controller = EscalationController::new(vec![tier(&fast)], brand_separation_policy())
        .unwrap()
        .with_report_tier(tier(&writer));
    let outcome = controller.run("q").await;

    match outcome {
        EscalationOutcome::Reported {
            tier, narrative, ..
        } => {
            assert_eq!(tier, 0);
            assert!(narrative.contains("se dividió"));
        }
        other => panic!("expected Reported, got {other:?}"),
    }

    let prompts = writer.prompts().await;
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("\n  \"anio_separacion\": \"2003\""));
    assert!(prompts[0].contains("dueños"));
    let reparsed: serde_json::Value = serde_json::from_str(&prompts[0]).unwrap();
    assert_eq!(reparsed["marca_original"], "La Vaquita");
}

#[tokio::test]
async fn report_failure_keeps_the_validated_payload() {
    let fast = ScriptedCapability::new("fast", vec![Step::text(COMPLETE)]);
    let writer = ScriptedCapability::new("writer", vec![Step::Err("upstream 503")]);

    let controller = EscalationController::new(vec![tier(&fast)], brand_separation_policy())
        .unwrap()
        .with_report_tier(tier(&writer));
    let outcome = controller.run("q").await;

    match &outcome {
        EscalationOutcome::ReportFailed { payload, error, .. } => {
            assert_eq!(payload.value["marca_original"], "La Vaquita");
            assert!(!error.is_timeout());
        }
        other => panic!("expected ReportFailed, got {other:?}"),
    }
    assert!(outcome.diagnostic().contains("report generation failed"));
}

#[tokio::test]
async fn structured_responses_skip_extraction_but_not_validation() {
    let fast = ScriptedCapability::new(
        "fast",
        vec![Step::Structured(json!({
            "anio_separacion": "2003",
            "motivo": "herencia",
            "marca_original": "La Vaquita",
            "marcas_resultantes": [{"marca": "Supermu", "dueños": ""}]
        }))],
    );
    let strong = ScriptedCapability::new(
        "strong",
        vec![Step::Structured(json!({
            "anio_separacion": "2003",
            "motivo": "herencia",
            "marca_original": "La Vaquita",
            "marcas_resultantes": [{"marca": "Supermu", "dueños": "Hermanos Ruiz"}]
        }))],
    );

    let controller =
        EscalationController::new(vec![tier(&fast), tier(&strong)], brand_separation_policy())
            .unwrap();
    let outcome = controller.run("q").await;

    match outcome {
        EscalationOutcome::Succeeded {
            tier, failed_tiers, ..
        } => {
            assert_eq!(tier, 1);
            assert!(matches!(
                &failed_tiers[0].failure,
                TierFailure::Incomplete { failed_fields, .. }
                    if failed_fields == &vec!["marcas_resultantes".to_string()]
            ));
        }
        other => panic!("expected Succeeded, got {other:?}"),
    }
}

#[tokio::test]
async fn extraction_and_transport_failures_are_tier_failures() {
    let fast = ScriptedCapability::new("fast", vec![Step::text("No encontré información.")]);
    let strong = ScriptedCapability::new("strong", vec![Step::Err("connection reset")]);

    let controller =
        EscalationController::new(vec![tier(&fast), tier(&strong)], brand_separation_policy())
            .unwrap();
    let outcome = controller.run("q").await;

    let EscalationOutcome::Exhausted(err) = outcome else {
        panic!("expected Exhausted");
    };
    assert!(matches!(err.attempts[0].failure, TierFailure::Extraction(_)));
    assert!(matches!(err.attempts[1].failure, TierFailure::Invocation(_)));
    let text = err.to_string();
    assert!(text.contains("balanced"), "{text}");
    assert!(text.contains("connection reset"), "{text}");
}

#[tokio::test]
async fn tiers_built_from_config_use_the_tier_timeout() -> anyhow::Result<()> {
    let fast = ScriptedCapability::new("fast", vec![Step::text(COMPLETE)]);
    let config = PipelineConfig {
        tier_timeout_ms: 1_500,
        ..PipelineConfig::default()
    };
    let controller = EscalationController::from_capabilities(
        vec![fast.shared()],
        brand_separation_policy(),
        &config,
    )?;
    assert_eq!(controller.tiers()[0].timeout, Duration::from_millis(1_500));
    assert!(!controller.has_report_tier());

    let outcome = controller.run("q").await;
    let payload = outcome.payload().ok_or_else(|| anyhow::anyhow!("no payload"))?;
    assert_eq!(payload.value["anio_separacion"], "2003");
    Ok(())
}
