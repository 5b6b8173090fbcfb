use super::support::*;

#[test]
fn every_finder_returns_the_created_instance() {
    let fx = league();
    let teams = fx.class("Team");
    let created = teams.create(json!({"name": "Bears"})).expect("create team");
    let id = created.id();

    let found = teams.find(&id).expect("find").expect("team exists");
    assert!(found.ptr_eq(&created));

    let first = teams
        .first(&Query::new().eq("name", "Bears"))
        .expect("first")
        .expect("team matches");
    assert!(first.ptr_eq(&created));

    let all = teams.all(&Query::new()).expect("all");
    assert_eq!(all.len(), 1);
    assert!(all[0].ptr_eq(&created));

    let many = teams.find_many(&[id.clone()]).expect("find_many");
    assert!(many[0].ptr_eq(&created));
}

#[test]
fn loading_a_mapped_id_keeps_the_live_instance() {
    let fx = league();
    let teams = fx.class("Team");
    let created = teams.create(json!({"name": "Bears"})).expect("create team");

    let loaded = teams
        .load(json!({"_id": created.id(), "name": "Stale copy"}))
        .expect("load");
    assert!(loaded.ptr_eq(&created));
    assert_eq!(created.get_str("name").as_deref(), Some("Bears"));
}

#[test]
fn stored_documents_are_instantiated_once() {
    let fx = league();
    let teams = fx.class("Team");
    let id = teams.create(json!({"name": "Bears"})).expect("create team").id();
    fx.forget_instances();
    fx.store.clear_operations();

    let first = teams.find(&id).expect("find").expect("team exists");
    let second = teams.find(&id).expect("find").expect("team exists");
    assert!(first.ptr_eq(&second));
    assert_eq!(fx.store.reads_of("teams").len(), 1);
    assert!(fx.mapper.identity_map().contains("Team", &id));
}

#[test]
fn find_many_only_queries_unmapped_ids() {
    let fx = league();
    let teams = fx.class("Team");
    let a = teams.create(json!({"name": "A"})).expect("create a").id();
    let b = teams.create(json!({"name": "B"})).expect("create b").id();
    let c = teams.create(json!({"name": "C"})).expect("create c").id();
    fx.forget_instances();
    let mapped_a = teams.find(&a).expect("find a").expect("a exists");
    fx.store.clear_operations();

    let found = teams.find_many(&[a.clone(), b.clone(), c.clone()]).expect("find_many");

    assert_eq!(found.len(), 3);
    assert!(found[0].ptr_eq(&mapped_a));
    assert_eq!(found[1].id(), b);
    assert_eq!(found[2].id(), c);
    assert_eq!(
        fx.store.reads_of("teams"),
        vec![StoreOperation::FindIds {
            collection: "teams".to_string(),
            ids: vec![b, c],
        }]
    );
}

#[test]
fn id_queries_fetch_only_missing_documents() {
    let fx = league();
    let teams = fx.class("Team");
    let a = teams.create(json!({"name": "A"})).expect("create a").id();
    let b = teams.create(json!({"name": "B"})).expect("create b").id();
    fx.forget_instances();
    let mapped_a = teams.find(&a).expect("find a").expect("a exists");
    fx.store.clear_operations();

    let found = teams
        .all(&Query::new().any_of("_id", [a.clone(), b.clone()]))
        .expect("all by ids");

    assert_eq!(found.len(), 2);
    assert!(found[0].ptr_eq(&mapped_a));
    assert_eq!(
        fx.store.reads_of("teams"),
        vec![StoreOperation::Find {
            collection: "teams".to_string(),
            query: Query::new().any_of("_id", [b]),
        }]
    );
}

#[test]
fn fully_mapped_lookups_do_not_touch_the_store() {
    let fx = league();
    let teams = fx.class("Team");
    let team_a = teams.create(json!({"name": "A"})).expect("create a");
    let team_b = teams.create(json!({"name": "B"})).expect("create b");
    let (a, b) = (team_a.id(), team_b.id());
    fx.store.clear_operations();

    teams.find(&a).expect("find a");
    teams.find_many(&[a.clone(), b.clone()]).expect("find_many");
    teams.first(&Query::by_id(b.as_str())).expect("first by id");

    assert!(fx.store.reads_of("teams").is_empty());
}

#[test]
fn destroy_evicts_the_instance() {
    let fx = league();
    let teams = fx.class("Team");
    let team = teams.create(json!({"name": "Bears"})).expect("create team");
    let id = team.id();
    assert_eq!(team.identity_map_key(), format!("Team:{id}"));

    team.destroy().expect("destroy");

    assert!(!fx.mapper.identity_map().contains("Team", &id));
    assert!(team.is_destroyed());
    assert!(teams.find(&id).expect("find").is_none());
}

#[test]
fn keys_include_the_class_name() {
    let fx = league();
    let team = fx.class("Team").create(json!({"_id": "shared"})).expect("create team");
    let coach = fx.class("Coach").create(json!({"_id": "shared"})).expect("create coach");

    assert_eq!(fx.mapper.identity_map().keys(), vec!["Coach:shared", "Team:shared"]);
    let found = fx.class("Team").find("shared").expect("find").expect("team exists");
    assert!(found.ptr_eq(&team));
    assert_eq!(coach.class_name(), "Coach");
}

#[test]
fn classes_can_use_their_own_map() {
    let fx = league();
    let isolated = Arc::new(IdentityMap::new());
    let coaches = fx.class("Coach");
    coaches.set_identity_map(isolated.clone());

    let coach = coaches.create(json!({"name": "Phil"})).expect("create coach");

    assert!(isolated.contains("Coach", &coach.id()));
    assert!(!fx.mapper.identity_map().contains("Coach", &coach.id()));
    let found = coaches.find(&coach.id()).expect("find").expect("coach exists");
    assert!(found.ptr_eq(&coach));
}

#[test]
fn subclasses_share_their_parent_map() {
    let fx = blog();
    let image = fx
        .class("Image")
        .create(json!({"caption": "sunset"}))
        .expect("create image");

    assert!(Arc::ptr_eq(&fx.class("Image").identity_map(), &fx.class("Attachment").identity_map()));
    let found = fx
        .class("Attachment")
        .find(&image.id())
        .expect("find through parent")
        .expect("attachment exists");
    assert_eq!(found.class_name(), "Image");
}

#[test]
fn disabled_map_hands_out_fresh_instances() {
    let mut config = MapperConfig::default();
    config.identity_map.enabled = false;
    let fx = Fixture::with_config(config);
    let teams = fx.mapper.define("Team").expect("define Team");
    let id = teams.create(json!({"name": "Bears"})).expect("create team").id();

    let first = teams.find(&id).expect("find").expect("team exists");
    let second = teams.find(&id).expect("find").expect("team exists");

    assert!(!first.ptr_eq(&second));
    assert!(fx.mapper.identity_map().is_empty());
}

#[test]
fn dropped_instances_are_read_again() {
    let fx = league();
    let teams = fx.class("Team");
    let id = teams.create(json!({"name": "Bears"})).expect("create team").id();
    fx.store.clear_operations();

    let found = teams.find(&id).expect("find").expect("team exists");

    assert_eq!(found.get_str("name").as_deref(), Some("Bears"));
    assert_eq!(fx.store.reads_of("teams").len(), 1);
    assert!(fx.mapper.identity_map().contains("Team", &id));
}
