use super::support::*;

const LEAGUE: &str = r#"
[[classes]]
name = "RetiredPlayer"
parent = "Player"

[[classes]]
name = "Player"
embeddable = true

[[classes]]
name = "Game"
collection = "fixtures"

[[classes.associations]]
kind = "belongs_to"
name = "team"

[[classes]]
name = "Team"

[[classes.associations]]
kind = "many"
name = "players"

[[classes.associations]]
kind = "many"
name = "games"
options = { dependent = "destroy" }

[[classes.nested_attributes]]
associations = ["players"]
allow_destroy = true
reject_if = "all_blank"
"#;

fn mapper_from(toml: &str) -> docmap::Result<Mapper> {
    init_logging();
    Mapper::from_config(MapperConfig::from_toml_str(toml)?)
}

#[test]
fn classes_and_associations_come_from_config() {
    let mapper = mapper_from(LEAGUE).expect("mapper from config");
    let mut names: Vec<String> = mapper.classes().iter().map(|class| class.name().to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["Game", "Player", "RetiredPlayer", "Team"]);

    let retired = mapper.class("RetiredPlayer").expect("RetiredPlayer");
    assert!(retired.is_a("Player"));
    assert!(retired.is_embeddable());
    assert_eq!(mapper.class("Game").expect("Game").collection(), "fixtures");

    let team = mapper.class("Team").expect("Team");
    assert!(team.association("games").expect("games").cascades());
    assert!(team.accepts_nested_attributes("players"));
}

#[test]
fn configured_mappers_are_fully_functional() {
    let mapper = mapper_from(LEAGUE).expect("mapper from config");
    let team = mapper
        .class("Team")
        .expect("Team")
        .create(json!({
            "name": "Bears",
            "players_attributes": [{"name": ""}, {"name": "sparky"}],
        }))
        .expect("create team");
    let players = team.association("players").expect("players").all().expect("load");
    assert_eq!(names(&players), vec!["sparky"]);

    let game = team.association("games").expect("games").create(json!({"opponent": "Wolves"})).expect("game");
    let stored = mapper.store().find_one("fixtures", &game.id()).expect("read");
    assert_eq!(stored.and_then(|raw| raw.get("team_id").cloned()), Some(json!(team.id())));

    team.destroy().expect("destroy team");
    assert_eq!(mapper.store().count("fixtures", &Query::new()).expect("count"), 0);
}

#[test]
fn unknown_options_are_rejected() {
    let err = mapper_from(
        r#"
        [[classes]]
        name = "Game"

        [[classes]]
        name = "Team"

        [[classes.associations]]
        kind = "many"
        name = "games"
        options = { dependant = "destroy" }
        "#,
    )
    .expect_err("misspelled option");
    assert!(matches!(err, MapperError::InvalidOption { .. }));
}

#[test]
fn nested_declarations_must_name_associations() {
    let err = mapper_from(
        r#"
        [[classes]]
        name = "Team"

        [[classes.nested_attributes]]
        associations = ["players"]
        "#,
    )
    .expect_err("undeclared association");
    assert!(matches!(err, MapperError::UnknownAssociation { .. }));
}

#[test]
fn missing_parents_are_reported() {
    let err = mapper_from(
        r#"
        [[classes]]
        name = "RetiredPlayer"
        parent = "Player"
        "#,
    )
    .expect_err("unknown parent");
    assert!(matches!(err, MapperError::Config { .. }));
}

#[test]
fn duplicate_class_names_are_rejected() {
    let err = mapper_from(
        r#"
        [[classes]]
        name = "Team"

        [[classes]]
        name = "Team"
        "#,
    )
    .expect_err("duplicate class");
    assert!(matches!(err, MapperError::InvalidOperation { .. }));
}

const SCHOOL: &str = r#"
[[classes]]
name = "Student"
parent = "Person"

[[classes]]
name = "Pet"

[[classes]]
name = "Person"

[[classes.associations]]
kind = "many"
name = "pets"
options = { dependent = "destroy" }

[[classes.nested_attributes]]
associations = ["pets"]
"#;

#[test]
fn configured_subclasses_inherit_their_parent_declarations() {
    let mapper = mapper_from(SCHOOL).expect("mapper from config");
    let students = mapper.class("Student").expect("Student");
    let pets = students.association("pets").expect("inherited pets");
    assert_eq!(pets.foreign_key.as_deref(), Some("person_id"));
    assert!(pets.cascades());
    assert!(students.accepts_nested_attributes("pets"));

    let student = students
        .create(json!({"name": "Sam", "pets_attributes": [{"name": "Koda"}]}))
        .expect("create student");
    let pet_class = mapper.class("Pet").expect("Pet");
    assert_eq!(pet_class.count(&Query::new()).expect("count"), 1);

    student.destroy().expect("destroy student");
    assert_eq!(pet_class.count(&Query::new()).expect("count"), 0);
}
