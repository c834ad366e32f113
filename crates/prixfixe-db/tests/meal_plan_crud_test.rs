//! Integration tests for meal plan, vote, and membership queries.

use chrono::{Duration, Utc};

use prixfixe_db::models::{MealPlanOptionVote, MealPlanStatus};
use prixfixe_db::queries::{meal_plans, votes};
use prixfixe_test_utils::fixtures::{self, PlanBuilder, RecipeBuilder};
use prixfixe_test_utils::{create_test_db, drop_test_db};

async fn seed_meal(pool: &sqlx::PgPool) {
    fixtures::basic_catalog(pool, &[("butter", "butter")]).await;
    RecipeBuilder::new("r1")
        .step(0)
        .ingredient(0, "butter", "g", 100.0, None)
        .insert(pool)
        .await;
    fixtures::meal(pool, "m1", 1.0, &[("r1", 1.0)]).await;
    fixtures::meal(pool, "m2", 1.0, &[("r1", 1.0)]).await;
}

fn vote(event: &str, option: &str, voter: &str, rank: i16) -> MealPlanOptionVote {
    MealPlanOptionVote {
        id: format!("{voter}-{option}"),
        option_id: option.to_owned(),
        event_id: event.to_owned(),
        voter_id: voter.to_owned(),
        rank,
        abstain: false,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn insert_and_read_back_plan() {
    let (pool, db_name) = create_test_db().await;
    seed_meal(&pool).await;
    fixtures::household(&pool, "h1", &["u1", "u2"]).await;

    let starts = Utc::now() + Duration::days(2);
    let plan_id = PlanBuilder::new("p1", "h1", Utc::now() + Duration::days(1))
        .event("e1", starts, &[("o1", "m1"), ("o2", "m2")])
        .insert(&pool)
        .await;

    let plan = meal_plans::get_meal_plan(&pool, &plan_id)
        .await
        .unwrap()
        .expect("plan exists");
    assert_eq!(plan.status, MealPlanStatus::AwaitingVotes);
    assert!(plan.finalized_at.is_none());

    let events = meal_plans::events_for_plan(&pool, &plan_id).await.unwrap();
    assert_eq!(events.len(), 1);
    let options = meal_plans::options_for_plan(&pool, &plan_id).await.unwrap();
    let ids: Vec<&str> = options.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["o1", "o2"]);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn due_plans_include_past_deadline_and_fully_voted() {
    let (pool, db_name) = create_test_db().await;
    seed_meal(&pool).await;
    fixtures::household(&pool, "h1", &["u1", "u2"]).await;

    let starts = Utc::now() + Duration::days(3);
    PlanBuilder::new("past", "h1", Utc::now() - Duration::minutes(1))
        .event("e-past", starts, &[("o-past", "m1")])
        .insert(&pool)
        .await;
    PlanBuilder::new("open", "h1", Utc::now() + Duration::days(1))
        .event("e-open", starts + Duration::days(1), &[("o-open-1", "m1"), ("o-open-2", "m2")])
        .insert(&pool)
        .await;

    let due = meal_plans::list_due(&pool, Utc::now(), 10).await.unwrap();
    assert_eq!(due, vec!["past".to_owned()]);

    let missing = meal_plans::missing_votes(&pool, "open").await.unwrap();
    assert_eq!(missing.len(), 2);

    for voter in ["u1", "u2"] {
        let mut tx = pool.begin().await.unwrap();
        votes::replace_ballot(
            &mut *tx,
            "e-open",
            voter,
            &[vote("e-open", "o-open-1", voter, 1)],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    assert!(meal_plans::missing_votes(&pool, "open").await.unwrap().is_empty());
    let due = meal_plans::list_due(&pool, Utc::now(), 10).await.unwrap();
    assert_eq!(due, vec!["past".to_owned(), "open".to_owned()]);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn replace_ballot_discards_previous_votes() {
    let (pool, db_name) = create_test_db().await;
    seed_meal(&pool).await;
    fixtures::household(&pool, "h1", &["u1"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() + Duration::days(1))
        .event("e1", Utc::now() + Duration::days(2), &[("o1", "m1"), ("o2", "m2")])
        .insert(&pool)
        .await;

    let mut tx = pool.begin().await.unwrap();
    votes::replace_ballot(
        &mut *tx,
        "e1",
        "u1",
        &[vote("e1", "o1", "u1", 1), vote("e1", "o2", "u1", 2)],
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    votes::replace_ballot(&mut *tx, "e1", "u1", &[vote("e1", "o2", "u1", 1)])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let ballot = votes::ballot_for_voter(&pool, "e1", "u1").await.unwrap();
    assert_eq!(ballot.len(), 1);
    assert_eq!(ballot[0].option_id, "o2");
    assert_eq!(ballot[0].rank, 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn set_status_only_moves_awaiting_plans() {
    let (pool, db_name) = create_test_db().await;
    seed_meal(&pool).await;
    fixtures::household(&pool, "h1", &["u1"]).await;
    PlanBuilder::new("p1", "h1", Utc::now())
        .event("e1", Utc::now() + Duration::days(2), &[("o1", "m1")])
        .insert(&pool)
        .await;

    let moved = meal_plans::set_status(&pool, "p1", MealPlanStatus::Finalized, "ok")
        .await
        .unwrap();
    assert!(moved);
    let again = meal_plans::set_status(&pool, "p1", MealPlanStatus::FinalizationFailed, "late")
        .await
        .unwrap();
    assert!(!again);

    let plan = meal_plans::get_meal_plan(&pool, "p1").await.unwrap().unwrap();
    assert_eq!(plan.status, MealPlanStatus::Finalized);
    assert_eq!(plan.status_explanation, "ok");
    assert!(plan.finalized_at.is_some());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn at_most_one_chosen_option_per_event() {
    let (pool, db_name) = create_test_db().await;
    seed_meal(&pool).await;
    fixtures::household(&pool, "h1", &["u1"]).await;
    PlanBuilder::new("p1", "h1", Utc::now())
        .event("e1", Utc::now() + Duration::days(2), &[("o1", "m1"), ("o2", "m2")])
        .insert(&pool)
        .await;

    meal_plans::option_set_chosen(&pool, "o1", false).await.unwrap();
    let second = meal_plans::option_set_chosen(&pool, "o2", false).await;
    assert!(second.is_err(), "unique partial index should reject a second winner");

    drop_test_db(&db_name).await;
}
