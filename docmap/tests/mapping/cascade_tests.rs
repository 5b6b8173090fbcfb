use super::support::*;

struct Season {
    team: DocumentRef,
    games: Vec<DocumentRef>,
    tickets: Vec<DocumentRef>,
    sponsor: DocumentRef,
}

fn season(fx: &Fixture) -> Season {
    let team = fx.class("Team").create(json!({"name": "Bears"})).expect("create team");
    let games_link = team.association("games").expect("games");
    let games: Vec<DocumentRef> = ["Wolves", "Lions"]
        .into_iter()
        .map(|opponent| games_link.create(json!({"opponent": opponent})).expect("create game"))
        .collect();
    let tickets = games
        .iter()
        .map(|game| {
            game.association("tickets")
                .expect("tickets")
                .create(json!({"seat": "A1"}))
                .expect("create ticket")
        })
        .collect();
    let sponsor = team
        .association("sponsors")
        .expect("sponsors")
        .create(json!({"name": "Acme"}))
        .expect("create sponsor");
    Season {
        team,
        games,
        tickets,
        sponsor,
    }
}

#[test]
fn destroy_cascades_through_dependent_associations() {
    let fx = league();
    let season = season(&fx);
    assert_eq!(fx.store.len("games"), 2);
    assert_eq!(fx.store.len("tickets"), 2);

    season.team.destroy().expect("destroy team");

    assert!(fx.store.raw("teams", &season.team.id()).is_none());
    assert_eq!(fx.store.len("games"), 0);
    assert!(season.games.iter().all(DocumentRef::is_destroyed));
    assert_eq!(fx.store.len("tickets"), 0);
    for game in &season.games {
        assert!(!fx.mapper.identity_map().contains("Game", &game.id()));
    }
}

#[test]
fn delete_all_members_skip_their_own_hooks() {
    let fx = league();
    let season = season(&fx);

    season.team.destroy().expect("destroy team");

    // tickets were removed in bulk, so the instances never saw a destroy
    assert!(season.tickets.iter().all(|ticket| !ticket.is_destroyed()));
}

#[test]
fn nullify_keeps_members_but_clears_the_link() {
    let fx = league();
    let season = season(&fx);
    assert_eq!(season.sponsor.get_str("team_id"), Some(season.team.id()));

    season.team.destroy().expect("destroy team");

    let raw = fx.store.raw("sponsors", &season.sponsor.id()).expect("sponsor survives");
    assert_eq!(raw["team_id"], Value::Null);
    assert_eq!(season.sponsor.get("team_id"), Some(Value::Null));
    assert!(!season.sponsor.is_destroyed());
}

#[test]
fn delete_all_removes_in_bulk_and_evicts_loaded_members() {
    let fx = league();
    let season = season(&fx);
    let games = season.team.association("games").expect("games");
    assert_eq!(games.all().expect("load").len(), 2);

    let removed = games.delete_all().expect("delete_all");

    assert_eq!(removed, 2);
    assert_eq!(fx.store.len("games"), 0);
    assert_eq!(games.count().expect("count"), 0);
    for game in &season.games {
        assert!(!fx.mapper.identity_map().contains("Game", &game.id()));
    }
    // no per-member destroy ran, so the tickets are still there
    assert_eq!(fx.store.len("tickets"), 2);
}

#[test]
fn destroy_all_runs_member_hooks() {
    let fx = league();
    let season = season(&fx);

    season.team.association("games").expect("games").destroy_all().expect("destroy_all");

    assert_eq!(fx.store.len("games"), 0);
    assert_eq!(fx.store.len("tickets"), 0);
    assert!(fx.store.raw("teams", &season.team.id()).is_some());
}

#[test]
fn failures_are_collected_after_every_member_was_attempted() {
    let fx = league();
    let season = season(&fx);
    let failing = season.games[0].id();
    fx.class("Game").after_destroy(move |game| {
        if game.id() == failing {
            Err(MapperError::InvalidOperation {
                message: "refund pending".to_string(),
            })
        } else {
            Ok(())
        }
    });

    let err = season.team.destroy().expect_err("cascade failure");

    match err {
        MapperError::CascadeFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].class, "Game");
            assert_eq!(failures[0].id, season.games[0].id());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(season.games.iter().all(DocumentRef::is_destroyed));
    assert_eq!(fx.store.len("games"), 0);
}

#[test]
fn after_destroy_hooks_run_once_per_destroy() {
    let fx = league();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    fx.class("Coach").after_destroy(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let coach = fx.class("Coach").create(json!({"name": "Phil"})).expect("create coach");
    coach.destroy().expect("destroy coach");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn redeclaring_a_dependent_association_registers_one_cascade() {
    let fx = league();
    let team = fx.class("Team");
    team.many("games", AssociationOptions::new().dependent(Dependent::Destroy))
        .expect("redeclare games");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    fx.class("Game").after_destroy(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let season = season(&fx);

    season.team.destroy().expect("destroy team");

    assert_eq!(calls.load(Ordering::SeqCst), season.games.len());
}

#[test]
fn dependent_is_ignored_where_it_cannot_cascade() {
    let fx = Fixture::new();
    fx.mapper.define_embedded("Player").expect("define Player");
    fx.mapper.define("Coach").expect("define Coach");
    let team = fx.mapper.define("Team").expect("define Team");
    let players = team
        .many("players", AssociationOptions::new().dependent(Dependent::Destroy))
        .expect("embedded many");
    let coach = team
        .one("coach", AssociationOptions::new().dependent(Dependent::Destroy))
        .expect("referenced one");
    assert!(!players.cascades());
    assert!(!coach.cascades());

    let team_doc = team
        .create(json!({"name": "Bears", "players": [{"name": "sparky"}]}))
        .expect("create team");
    let phil = fx.class("Coach").create(json!({"name": "Phil"})).expect("create coach");
    team_doc.association("coach").expect("coach").set(Some(phil.clone())).expect("hire");

    team_doc.destroy().expect("destroy team");

    assert!(fx.store.raw("coaches", &phil.id()).is_some());
}

#[test]
fn embedded_collections_refuse_bulk_operations() {
    let fx = league();
    let team = fx
        .class("Team")
        .create(json!({"name": "Bears", "players": [{"name": "sparky"}]}))
        .expect("create team");
    let players = team.association("players").expect("players");

    assert!(matches!(players.delete_all(), Err(MapperError::InvalidOperation { .. })));
    assert!(matches!(players.destroy_all(), Err(MapperError::InvalidOperation { .. })));
    assert!(matches!(players.nullify(), Err(MapperError::InvalidOperation { .. })));
}

#[test]
fn in_array_cascades_clear_the_owner_ids() {
    let fx = blog();
    let post_class = fx.class("Post");
    post_class
        .many("tags", AssociationOptions::new().in_array("tag_ids").dependent(Dependent::Destroy))
        .expect("dependent tags");
    let post = post_class.create(json!({"title": "Hello"})).expect("create post");
    let tags = post.association("tags").expect("tags");
    tags.create(json!({"name": "rust"})).expect("create tag");
    tags.create(json!({"name": "orm"})).expect("create tag");
    post.save().expect("save post");

    tags.destroy_all().expect("destroy_all");

    assert_eq!(post.get("tag_ids"), Some(json!([])));
    assert_eq!(fx.store.len("tags"), 0);
}
