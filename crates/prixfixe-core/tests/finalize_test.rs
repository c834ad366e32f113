//! Integration tests for ballots and plan finalization.

use chrono::{Duration, Utc};
use sqlx::PgPool;

use prixfixe_core::events::{DomainEvent, EventBus};
use prixfixe_core::finalize::{FinalizeOutcome, finalize_meal_plan};
use prixfixe_core::voting::{BallotEntry, cast_ballot};
use prixfixe_db::models::MealPlanStatus;
use prixfixe_db::queries::{meal_plans, votes};
use prixfixe_test_utils::fixtures::{self, PlanBuilder, RecipeBuilder};
use prixfixe_test_utils::{create_test_db, drop_test_db};

/// Household `h1` with the given members and meals `ma`, `mb`, `mc`.
async fn seed(pool: &PgPool, members: &[&str]) {
    fixtures::basic_catalog(pool, &[("onion", "onion")]).await;
    RecipeBuilder::new("r1")
        .step(0)
        .ingredient(0, "onion", "g", 100.0, None)
        .insert(pool)
        .await;
    for m in ["ma", "mb", "mc"] {
        fixtures::meal(pool, m, 2.0, &[("r1", 1.0)]).await;
    }
    fixtures::household(pool, "h1", members).await;
}

fn ranked(options: &[&str]) -> Vec<BallotEntry> {
    options
        .iter()
        .enumerate()
        .map(|(i, o)| BallotEntry::ranked(o, u8::try_from(i + 1).unwrap()))
        .collect()
}

async fn vote(pool: &PgPool, voter: &str, options: &[&str]) {
    cast_ballot(pool, "p1", "e1", voter, &ranked(options), Utc::now())
        .await
        .expect("cast ballot");
}

#[tokio::test]
async fn simple_majority_finalizes_once_everyone_voted() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1", "u2", "u3"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() + Duration::days(1))
        .event("e1", Utc::now() + Duration::days(2), &[("oA", "ma"), ("oB", "mb")])
        .insert(&pool)
        .await;

    let events = EventBus::new();
    let mut rx = events.subscribe();

    vote(&pool, "u1", &["oA", "oB"]).await;
    vote(&pool, "u2", &["oA", "oB"]).await;
    let early = finalize_meal_plan(&pool, &events, "p1", Utc::now()).await.unwrap();
    assert_eq!(early, FinalizeOutcome::NotReady);

    vote(&pool, "u3", &["oB", "oA"]).await;
    let outcome = finalize_meal_plan(&pool, &events, "p1", Utc::now()).await.unwrap();
    assert_eq!(outcome, FinalizeOutcome::Finalized);

    let options = meal_plans::options_for_event(&pool, "e1").await.unwrap();
    let chosen: Vec<(&str, bool)> = options
        .iter()
        .filter(|o| o.chosen)
        .map(|o| (o.id.as_str(), o.tiebroken))
        .collect();
    assert_eq!(chosen, vec![("oA", false)]);

    let plan = meal_plans::get_meal_plan(&pool, "p1").await.unwrap().unwrap();
    assert_eq!(plan.status, MealPlanStatus::Finalized);
    assert!(plan.finalized_at.is_some());

    let event = meal_plans::get_event(&pool, "e1").await.unwrap().unwrap();
    assert!(event.status_explanation.contains("oA"), "{}", event.status_explanation);

    let published = rx.try_recv().expect("one event published");
    assert_eq!(
        published,
        DomainEvent::PlanFinalized {
            plan_id: "p1".into(),
            outcome: MealPlanStatus::Finalized,
        }
    );

    let again = finalize_meal_plan(&pool, &events, "p1", Utc::now()).await.unwrap();
    assert_eq!(
        again,
        FinalizeOutcome::AlreadyTerminal {
            status: MealPlanStatus::Finalized
        }
    );
    assert!(rx.try_recv().is_err(), "no second event");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn instant_runoff_eliminates_last_place() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1", "u2", "u3", "u4", "u5"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() + Duration::days(1))
        .event(
            "e1",
            Utc::now() + Duration::days(2),
            &[("oA", "ma"), ("oB", "mb"), ("oC", "mc")],
        )
        .insert(&pool)
        .await;

    vote(&pool, "u1", &["oA", "oB", "oC"]).await;
    vote(&pool, "u2", &["oA", "oB", "oC"]).await;
    vote(&pool, "u3", &["oB", "oC", "oA"]).await;
    vote(&pool, "u4", &["oB", "oC", "oA"]).await;
    vote(&pool, "u5", &["oC", "oA", "oB"]).await;

    let outcome = finalize_meal_plan(&pool, &EventBus::new(), "p1", Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, FinalizeOutcome::Finalized);

    let winner = meal_plans::options_for_event(&pool, "e1")
        .await
        .unwrap()
        .into_iter()
        .find(|o| o.chosen)
        .unwrap();
    assert_eq!(winner.id, "oA");
    assert!(!winner.tiebroken);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn even_split_is_tiebroken_by_option_id() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1", "u2"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() + Duration::days(1))
        .event("e1", Utc::now() + Duration::days(2), &[("01", "ma"), ("02", "mb")])
        .insert(&pool)
        .await;

    vote(&pool, "u1", &["01", "02"]).await;
    vote(&pool, "u2", &["02", "01"]).await;

    finalize_meal_plan(&pool, &EventBus::new(), "p1", Utc::now())
        .await
        .unwrap();
    let winner = meal_plans::options_for_event(&pool, "e1")
        .await
        .unwrap()
        .into_iter()
        .find(|o| o.chosen)
        .unwrap();
    assert_eq!(winner.id, "01");
    assert!(winner.tiebroken);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn deadline_tallies_partial_ballots() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1", "u2", "u3"]).await;
    let deadline = Utc::now() + Duration::hours(1);
    PlanBuilder::new("p1", "h1", deadline)
        .event("e1", Utc::now() + Duration::days(2), &[("oA", "ma"), ("oB", "mb")])
        .insert(&pool)
        .await;

    vote(&pool, "u1", &["oB", "oA"]).await;

    let events = EventBus::new();
    let before = finalize_meal_plan(&pool, &events, "p1", Utc::now()).await.unwrap();
    assert_eq!(before, FinalizeOutcome::NotReady);

    let after = finalize_meal_plan(&pool, &events, "p1", deadline + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(after, FinalizeOutcome::Finalized);
    let winner = meal_plans::options_for_event(&pool, "e1")
        .await
        .unwrap()
        .into_iter()
        .find(|o| o.chosen)
        .unwrap();
    assert_eq!(winner.id, "oB");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn no_ballots_fails_finalization_but_keeps_decided_events() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1"]).await;
    let deadline = Utc::now() - Duration::minutes(1);
    PlanBuilder::new("p1", "h1", deadline)
        .event("e1", Utc::now() + Duration::days(2), &[("oA", "ma")])
        .event(
            "e2",
            Utc::now() + Duration::days(3),
            &[("oB", "mb"), ("oC", "mc")],
        )
        .insert(&pool)
        .await;

    let events = EventBus::new();
    let mut rx = events.subscribe();
    let outcome = finalize_meal_plan(&pool, &events, "p1", Utc::now()).await.unwrap();
    let FinalizeOutcome::FinalizationFailed { reason } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(reason, "no winner for event e2: insufficient_quorum");

    let plan = meal_plans::get_meal_plan(&pool, "p1").await.unwrap().unwrap();
    assert_eq!(plan.status, MealPlanStatus::FinalizationFailed);
    assert_eq!(plan.status_explanation, reason);

    // The single-option event is still decided.
    let e1 = meal_plans::options_for_event(&pool, "e1").await.unwrap();
    assert!(e1[0].chosen);
    let e2 = meal_plans::get_event(&pool, "e2").await.unwrap().unwrap();
    assert_eq!(e2.status_explanation, "no winner: insufficient_quorum");

    assert!(matches!(
        rx.try_recv(),
        Ok(DomainEvent::PlanFinalizationFailed { .. })
    ));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn all_abstaining_fails_with_all_abstain() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1", "u2"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() + Duration::days(1))
        .event("e1", Utc::now() + Duration::days(2), &[("oA", "ma"), ("oB", "mb")])
        .insert(&pool)
        .await;

    for voter in ["u1", "u2"] {
        cast_ballot(
            &pool,
            "p1",
            "e1",
            voter,
            &[BallotEntry::abstain("oA"), BallotEntry::abstain("oB")],
            Utc::now(),
        )
        .await
        .unwrap();
    }

    let outcome = finalize_meal_plan(&pool, &EventBus::new(), "p1", Utc::now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        FinalizeOutcome::FinalizationFailed {
            reason: "no winner for event e1: all_abstain".into()
        }
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ballots_from_former_members_are_ignored() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1", "u2", "u3"]).await;
    let deadline = Utc::now() + Duration::hours(1);
    PlanBuilder::new("p1", "h1", deadline)
        .event("e1", Utc::now() + Duration::days(2), &[("oA", "ma"), ("oB", "mb")])
        .insert(&pool)
        .await;

    vote(&pool, "u1", &["oA", "oB"]).await;
    vote(&pool, "u2", &["oA", "oB"]).await;
    vote(&pool, "u3", &["oB", "oA"]).await;
    prixfixe_db::queries::households::remove_member(&pool, "h1", "u1")
        .await
        .unwrap();
    prixfixe_db::queries::households::remove_member(&pool, "h1", "u2")
        .await
        .unwrap();

    finalize_meal_plan(&pool, &EventBus::new(), "p1", Utc::now())
        .await
        .unwrap();
    let winner = meal_plans::options_for_event(&pool, "e1")
        .await
        .unwrap()
        .into_iter()
        .find(|o| o.chosen)
        .unwrap();
    assert_eq!(winner.id, "oB");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ballot_rules_are_enforced() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1"]).await;
    let deadline = Utc::now() + Duration::hours(1);
    PlanBuilder::new("p1", "h1", deadline)
        .event("e1", Utc::now() + Duration::days(2), &[("oA", "ma"), ("oB", "mb")])
        .insert(&pool)
        .await;

    let err = cast_ballot(&pool, "p1", "e1", "stranger", &ranked(&["oA"]), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_input");

    let err = cast_ballot(
        &pool,
        "p1",
        "e1",
        "u1",
        &[BallotEntry::ranked("oA", 1), BallotEntry::ranked("oB", 1)],
        Utc::now(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "invalid_input");

    let err = cast_ballot(&pool, "p1", "nope", "u1", &ranked(&["oA"]), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let err = cast_ballot(
        &pool,
        "p1",
        "e1",
        "u1",
        &ranked(&["oA"]),
        deadline + Duration::seconds(1),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ballot_at_the_deadline_instant_is_rejected() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() + Duration::hours(1))
        .event("e1", Utc::now() + Duration::days(2), &[("oA", "ma"), ("oB", "mb")])
        .insert(&pool)
        .await;
    let deadline = meal_plans::get_meal_plan(&pool, "p1")
        .await
        .unwrap()
        .unwrap()
        .voting_deadline;

    cast_ballot(
        &pool,
        "p1",
        "e1",
        "u1",
        &ranked(&["oA", "oB"]),
        deadline - Duration::microseconds(1),
    )
    .await
    .expect("ballot just before the deadline");

    let err = cast_ballot(&pool, "p1", "e1", "u1", &ranked(&["oB", "oA"]), deadline)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    let due = meal_plans::list_due(&pool, deadline, 10).await.unwrap();
    assert_eq!(due.len(), 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn recasting_a_ballot_replaces_it() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1", "u2"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() + Duration::days(1))
        .event("e1", Utc::now() + Duration::days(2), &[("oA", "ma"), ("oB", "mb")])
        .insert(&pool)
        .await;

    vote(&pool, "u1", &["oA", "oB"]).await;
    let first = votes::ballot_for_voter(&pool, "e1", "u1").await.unwrap();
    vote(&pool, "u1", &["oA", "oB"]).await;
    let second = votes::ballot_for_voter(&pool, "e1", "u1").await.unwrap();
    let key = |v: &prixfixe_db::models::MealPlanOptionVote| (v.id.clone(), v.option_id.clone(), v.rank);
    assert_eq!(
        first.iter().map(key).collect::<Vec<_>>(),
        second.iter().map(key).collect::<Vec<_>>()
    );

    vote(&pool, "u1", &["oB"]).await;
    let third = votes::ballot_for_voter(&pool, "e1", "u1").await.unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].option_id, "oB");
    assert_eq!(votes::votes_for_event(&pool, "e1").await.unwrap().len(), 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn terminal_plans_reject_ballots() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool, &["u1"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() + Duration::days(1))
        .event("e1", Utc::now() + Duration::days(2), &[("oA", "ma"), ("oB", "mb")])
        .insert(&pool)
        .await;

    vote(&pool, "u1", &["oA", "oB"]).await;
    finalize_meal_plan(&pool, &EventBus::new(), "p1", Utc::now())
        .await
        .unwrap();

    let err = cast_ballot(&pool, "p1", "e1", "u1", &ranked(&["oB"]), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    drop_test_db(&db_name).await;
}
