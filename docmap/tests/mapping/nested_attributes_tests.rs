use super::support::*;

fn team_with_player(fx: &Fixture, name: &str) -> (DocumentRef, DocumentRef) {
    let team = fx
        .class("Team")
        .create(json!({"name": "Bears", "players_attributes": [{"name": name}]}))
        .expect("create team");
    let player = team
        .association("players")
        .expect("players")
        .first()
        .expect("load players")
        .expect("player");
    (team, player)
}

fn stored_players(fx: &Fixture, team: &DocumentRef) -> Vec<Value> {
    fx.store
        .raw("teams", &team.id())
        .and_then(|raw| raw.get("players").cloned())
        .and_then(|players| players.as_array().cloned())
        .unwrap_or_default()
}

#[test]
fn creates_members_without_ids() {
    let fx = league();
    let (team, player) = team_with_player(&fx, "Normal guy");

    assert_eq!(player.get_str("name").as_deref(), Some("Normal guy"));
    assert!(!player.is_new());
    let stored = stored_players(&fx, &team);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["name"], "Normal guy");
}

#[test]
fn updates_the_member_with_a_matching_id() {
    let fx = league();
    let (team, sparky) = team_with_player(&fx, "sparky");

    team.assign_attributes(json!({"players_attributes": [{"_id": sparky.id(), "name": "koda"}]}))
        .expect("assign");
    team.save().expect("save");

    let players = team.association("players").expect("players").all().expect("load");
    assert_eq!(players.len(), 1);
    assert!(players[0].ptr_eq(&sparky));
    assert_eq!(names(&players), vec!["koda"]);
    let stored = stored_players(&fx, &team);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["name"], "koda");
}

#[test]
fn plain_id_keys_are_accepted() {
    let fx = league();
    let (team, sparky) = team_with_player(&fx, "sparky");

    team.association("players")
        .expect("players")
        .assign_nested(json!([{"id": sparky.id(), "name": "koda"}]))
        .expect("assign");

    assert_eq!(sparky.get_str("name").as_deref(), Some("koda"));
    assert!(sparky.get("id").is_none());
}

#[test]
fn destroy_flag_removes_the_member_when_allowed() {
    let fx = league();
    let (team, player) = team_with_player(&fx, "sparky");

    team.assign_attributes(json!({"players_attributes": [{"_id": player.id(), "_destroy": "1"}]}))
        .expect("assign");
    team.save().expect("save");

    assert_eq!(team.association("players").expect("players").count().expect("count"), 0);
    assert!(stored_players(&fx, &team).is_empty());
}

#[test]
fn destroy_flag_is_ignored_unless_allowed() {
    let fx = league_with(NestedAttributesOptions::new());
    let (team, player) = team_with_player(&fx, "sparky");

    team.assign_attributes(json!({"players_attributes": [{"_id": player.id(), "_destroy": true, "name": "still here"}]}))
        .expect("assign");
    team.save().expect("save");

    let players = team.association("players").expect("players").all().expect("load");
    assert_eq!(names(&players), vec!["still here"]);
    assert_eq!(stored_players(&fx, &team).len(), 1);
}

#[test]
fn falsy_destroy_flags_update_instead() {
    let fx = league();
    let (team, player) = team_with_player(&fx, "sparky");

    team.assign_attributes(json!({"players_attributes": [{"_id": player.id(), "_destroy": "0", "name": "koda"}]}))
        .expect("assign");

    assert_eq!(team.association("players").expect("players").count().expect("count"), 1);
    assert_eq!(player.get_str("name").as_deref(), Some("koda"));
    assert!(player.get("_destroy").is_none());
}

#[test]
fn keyed_payloads_are_applied_in_numeric_key_order() {
    let fx = league();
    let team = fx
        .class("Team")
        .create(json!({
            "name": "Bears",
            "players_attributes": {
                "10": {"name": "third"},
                "2": {"name": "second"},
                "0": {"name": "first"},
            },
        }))
        .expect("create team");

    let players = team.association("players").expect("players").all().expect("load");
    assert_eq!(names(&players), vec!["first", "second", "third"]);
}

#[test]
fn unknown_ids_are_skipped() {
    let fx = league();
    let (team, player) = team_with_player(&fx, "sparky");

    team.assign_attributes(json!({"players_attributes": [
        {"_id": "missing", "name": "ghost"},
        {"name": "rookie"},
    ]}))
    .expect("assign");

    let players = team.association("players").expect("players").all().expect("load");
    assert_eq!(names(&players), vec!["sparky", "rookie"]);
    assert_eq!(player.get_str("name").as_deref(), Some("sparky"));
}

#[test]
fn reject_if_all_blank_skips_empty_elements() {
    let fx = league_with(NestedAttributesOptions::new().reject_if(RejectIf::AllBlank));
    let team = fx
        .class("Team")
        .create(json!({
            "name": "Bears",
            "players_attributes": [{"name": "", "number": null, "_destroy": "0"}, {"name": "Real"}],
        }))
        .expect("create team");

    let players = team.association("players").expect("players").all().expect("load");
    assert_eq!(names(&players), vec!["Real"]);
}

#[test]
fn reject_if_predicates_see_the_raw_element() {
    let fx = league_with(NestedAttributesOptions::new().reject_if(RejectIf::predicate(|attributes| {
        attributes.get("name").and_then(Value::as_str) == Some("nobody")
    })));
    let team = fx
        .class("Team")
        .create(json!({
            "name": "Bears",
            "players_attributes": [{"name": "nobody"}, {"name": "somebody"}],
        }))
        .expect("create team");

    let players = team.association("players").expect("players").all().expect("load");
    assert_eq!(names(&players), vec!["somebody"]);
}

#[test]
fn referenced_members_are_linked_and_persisted() {
    let fx = league();
    let team = fx
        .class("Team")
        .create(json!({"name": "Bears", "games_attributes": [{"opponent": "Wolves"}]}))
        .expect("create team");
    let games = team.association("games").expect("games");
    assert_eq!(games.count().expect("count"), 1);
    let game = games.first().expect("load").expect("game");
    assert_eq!(game.get_str("team_id"), Some(team.id()));

    games
        .assign_nested(json!([{"_id": game.id(), "opponent": "Lions"}]))
        .expect("update game");
    assert_eq!(game.get_str("opponent").as_deref(), Some("Lions"));
    let raw = fx.store.raw("games", &game.id()).expect("stored game");
    assert_eq!(raw["opponent"], "Wolves");
    team.save().expect("save team");
    let raw = fx.store.raw("games", &game.id()).expect("stored game");
    assert_eq!(raw["opponent"], "Lions");

    games
        .assign_nested(json!([{"_id": game.id(), "_destroy": true}]))
        .expect("destroy game");
    assert!(game.is_destroyed());
    assert_eq!(games.count().expect("count"), 0);
    assert!(fx.store.raw("games", &game.id()).is_none());
}

#[test]
fn singular_associations_build_update_and_destroy() {
    let fx = league();
    let team = fx.class("Team").create(json!({"name": "Bears"})).expect("create team");

    team.assign_nested_attributes("coach", json!({"name": "Phil"}))
        .expect("build coach");
    let coach = team.association("coach").expect("coach").get().expect("load").expect("coach");
    assert_eq!(coach.get_str("team_id"), Some(team.id()));
    assert!(!coach.is_new());

    team.assign_nested_attributes("coach", json!({"_id": coach.id(), "name": "Phil Jackson"}))
        .expect("update coach");
    team.save().expect("save team");
    let raw = fx.store.raw("coaches", &coach.id()).expect("stored coach");
    assert_eq!(raw["name"], "Phil Jackson");

    team.assign_nested_attributes("coach", json!({"_id": coach.id(), "_destroy": "true"}))
        .expect("destroy coach");
    assert!(team.association("coach").expect("coach").get().expect("load").is_none());
    assert_eq!(fx.class("Coach").count(&Query::new()).expect("count"), 0);
}

#[test]
fn singular_payloads_must_be_objects() {
    let fx = league();
    let team = fx.class("Team").create(json!({"name": "Bears"})).expect("create team");

    let err = team
        .assign_nested_attributes("coach", json!([{"name": "Phil"}]))
        .expect_err("list for a singular association");
    assert!(matches!(err, MapperError::InvalidPayload { .. }));
}

#[test]
fn scalar_collection_payloads_are_rejected() {
    let fx = league();
    let team = fx.class("Team").create(json!({"name": "Bears"})).expect("create team");

    let err = team
        .assign_attributes(json!({"players_attributes": "sparky"}))
        .expect_err("string payload");
    assert!(matches!(err, MapperError::InvalidPayload { .. }));
}

#[test]
fn undeclared_associations_refuse_nested_payloads() {
    let fx = league();
    let team = fx.class("Team").create(json!({"name": "Bears"})).expect("create team");

    let err = team
        .assign_nested_attributes("sponsors", json!([{"name": "Acme"}]))
        .expect_err("sponsors are not nested");
    assert!(matches!(err, MapperError::InvalidOperation { .. }));

    let err = team
        .assign_nested_attributes("owners", json!([]))
        .expect_err("unknown association");
    assert!(matches!(err, MapperError::UnknownAssociation { .. }));
}

#[test]
fn declaring_unknown_associations_fails() {
    let fx = league();
    let err = fx
        .class("Team")
        .accepts_nested_attributes_for(&["players", "owners"], NestedAttributesOptions::new())
        .expect_err("unknown association");
    match err {
        MapperError::UnknownAssociation { class, name } => {
            assert_eq!(class, "Team");
            assert_eq!(name, "owners");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn nested_payloads_reach_several_levels() {
    let fx = household();
    let person = fx
        .class("Person")
        .create(json!({
            "name": "Ana",
            "pets_attributes": [{"name": "Koda", "toys_attributes": [{"name": "Ball"}, {"name": "Rope"}]}],
        }))
        .expect("create person");

    let pet = person.association("pets").expect("pets").first().expect("load").expect("pet");
    let toys = pet.association("toys").expect("toys").all().expect("load");
    assert_eq!(names(&toys), vec!["Ball", "Rope"]);
    assert!(toys[1].root_document().expect("root").ptr_eq(&person));

    let raw = fx.store.raw("persons", &person.id()).expect("stored person");
    assert_eq!(raw["pets"][0]["toys"][1]["name"], "Rope");
}

#[test]
fn unsaved_owners_write_new_referenced_members_with_their_first_save() {
    let fx = league();
    let team = fx
        .class("Team")
        .build(json!({
            "name": "Bears",
            "games_attributes": [{"opponent": "Lions"}],
            "coach_attributes": {"name": "Phil"},
        }))
        .expect("build team");
    let game = team.association("games").expect("games").first().expect("load").expect("game");
    let coach = team.association("coach").expect("coach").get().expect("load").expect("coach");

    assert!(team.is_new() && game.is_new() && coach.is_new());
    assert_eq!(game.get_str("team_id"), Some(team.id()));
    assert_eq!(coach.get_str("team_id"), Some(team.id()));
    assert_eq!(fx.store.len("teams"), 0);
    assert_eq!(fx.store.len("games"), 0);
    assert_eq!(fx.store.len("coaches"), 0);

    team.save().expect("save team");

    assert!(!game.is_new() && !coach.is_new());
    let raw = fx.store.raw("games", &game.id()).expect("stored game");
    assert_eq!(raw["team_id"], json!(team.id()));
    assert!(fx.store.raw("coaches", &coach.id()).is_some());
}
