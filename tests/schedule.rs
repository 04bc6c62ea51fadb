use cadence::{
    App, AppExit, Commands, Entity, EventWriter, Extract, First, MainApp, Plugin, Prepare, Query,
    RenderApp, ResMut, Startup, Update, With,
};

struct IterCount(u32);

fn run_once(mut exit: EventWriter<AppExit>) {
    exit.send(AppExit);
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position(f32, f32);
struct Sprite;
struct Extracted(Entity, Position);

cadence::component! {
    Position,
    Sprite,
    Extracted,
}

#[test]
fn extraction_copies_into_the_render_world() {
    fn spawn_sprites(mut cmd: Commands) {
        cmd.spawn((Position(1.0, 2.0), Sprite));
        cmd.spawn((Position(3.0, 4.0), Sprite));
        cmd.spawn(Position(9.0, 9.0));
    }

    // Reads the main world, writes the render world
    fn extract_sprites(
        mut sprites: Extract<(Entity, &Position), With<Sprite>>,
        mut cmd: Commands,
    ) {
        sprites.for_each(|(entity, position)| {
            cmd.spawn(Extracted(entity, *position));
        });
    }

    let mut app = App::new();
    app.add_system(Startup, spawn_sprites);
    app.add_system(Prepare, extract_sprites);
    app.add_system(First, run_once);
    app.enable_loop();
    app.run().unwrap();

    let render = app.sub_app::<RenderApp>();
    let mut extracted = Vec::new();
    Query::<&Extracted>::new(render.world()).for_each(|value| extracted.push(value.1));
    extracted.sort_by(|a, b| a.0.total_cmp(&b.0));
    assert_eq!(extracted, [Position(1.0, 2.0), Position(3.0, 4.0)]);

    // The source world is untouched
    let main = app.sub_app::<MainApp>();
    assert_eq!(main.world().entity_count(), 3);
}

struct Stock(u32);

struct EconomyPlugin;

impl Plugin for EconomyPlugin {
    fn build(&self, app: &mut App) {
        fn restock(mut stock: ResMut<Stock>) {
            stock.0 += 10;
        }

        app.insert_resource(Stock(0));
        app.add_system(Update, restock);
    }
}

#[test]
fn plugins_register_once() {
    let mut app = App::new();
    app.add_plugin(EconomyPlugin);
    // Second registration warns and is ignored
    app.add_plugin(EconomyPlugin);
    app.add_system(First, run_once);
    app.enable_loop();
    app.run().unwrap();

    assert_eq!(
        app.sub_app::<MainApp>()
            .world()
            .resource::<Stock>()
            .unwrap()
            .0,
        10
    );
}

#[test]
fn duplicate_system_registration_keeps_one_node() {
    fn bump(mut iter: ResMut<IterCount>) {
        iter.0 += 1;
    }

    let mut app = App::new();
    app.insert_resource(IterCount(0));
    app.add_system(Update, bump);
    app.add_system(Update, bump);
    app.add_system(First, run_once);
    app.enable_loop();
    app.run().unwrap();

    assert_eq!(
        app.sub_app::<MainApp>()
            .world()
            .resource::<IterCount>()
            .unwrap()
            .0,
        1
    );
}

#[test]
fn named_and_unknown_worker_pools() {
    fn on_single(mut iter: ResMut<IterCount>) {
        iter.0 += 1;
    }

    fn on_custom(mut stock: ResMut<Stock>) {
        stock.0 += 1;
    }

    fn on_missing(mut count: ResMut<u64>) {
        *count += 1;
    }

    let mut app = App::new();
    app.add_worker("custom", 2)
        .insert_resource(IterCount(0))
        .insert_resource(Stock(0))
        .insert_resource(0u64);
    app.add_system(Update, on_single).use_worker("single");
    app.add_system(Update, on_custom).use_worker("custom");
    // Unknown pool: warns at build and falls back to the default pool
    app.add_system(Update, on_missing).use_worker("nope");
    app.run().unwrap();

    let main = app.sub_app::<MainApp>();
    let world = main.world();
    assert_eq!(world.resource::<IterCount>().unwrap().0, 1);
    assert_eq!(world.resource::<Stock>().unwrap().0, 1);
    assert_eq!(*world.resource::<u64>().unwrap(), 1);
}

#[derive(Clone, Copy)]
enum Pipeline {
    Produce,
    Consume,
}

impl cadence::SystemSet for Pipeline {
    fn index(self) -> usize {
        self as usize
    }
}

#[test]
fn sets_order_members_block_wise() {
    struct Log(Vec<&'static str>);

    fn produce_a(mut log: ResMut<Log>) {
        log.0.push("produce");
    }
    fn produce_b(mut log: ResMut<Log>) {
        log.0.push("produce");
    }
    fn consume(mut log: ResMut<Log>) {
        log.0.push("consume");
    }

    let mut app = App::new();
    app.insert_resource(Log(Vec::new()));
    app.configure_sets([Pipeline::Produce, Pipeline::Consume]);
    // Registered consumer-first; the set order must still win
    app.add_system(Update, consume).in_sets(Pipeline::Consume);
    app.add_system(Update, produce_a).in_sets(Pipeline::Produce);
    app.add_system(Update, produce_b).in_sets(Pipeline::Produce);
    app.run().unwrap();

    let main = app.sub_app::<MainApp>();
    let log = main.world().resource::<Log>().unwrap();
    assert_eq!(log.0.len(), 3);
    assert_eq!(log.0[2], "consume");
}
