use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use cadence::{
    App, AppExit, Commands, Entity, EventReader, EventWriter, First, Local, Res, ResMut, Shutdown,
    Startup, StateTransit, Update,
};

struct IterCount(u32);
struct ExitRan(bool);

fn drive_iterations<const N: u32>(mut iter: ResMut<IterCount>, mut exit: EventWriter<AppExit>) {
    iter.0 += 1;
    if iter.0 >= N {
        exit.send(AppExit);
    }
}

#[test]
fn exit_event_stops_loop_after_one_iteration() {
    fn request_exit(mut exit: EventWriter<AppExit>) {
        exit.send(AppExit);
    }

    fn count_iteration(mut iter: ResMut<IterCount>) {
        iter.0 += 1;
    }

    fn mark_exit(mut ran: ResMut<ExitRan>) {
        ran.0 = true;
    }

    let mut app = App::new();
    app.insert_resource(IterCount(0))
        .insert_resource(ExitRan(false))
        .enable_loop();
    app.add_system(Startup, request_exit);
    app.add_system(Update, count_iteration);
    app.add_system(Shutdown, mark_exit);
    app.run().unwrap();

    let main = app.sub_app::<cadence::MainApp>();
    assert_eq!(main.world().resource::<IterCount>().unwrap().0, 1);
    assert!(main.world().resource::<ExitRan>().unwrap().0);
}

#[test]
fn disabled_loop_runs_exactly_once() {
    fn count_iteration(mut iter: ResMut<IterCount>) {
        iter.0 += 1;
    }

    let mut app = App::new();
    app.insert_resource(IterCount(0));
    app.add_system(Update, count_iteration);
    app.run().unwrap();

    assert_eq!(
        app.sub_app::<cadence::MainApp>()
            .world()
            .resource::<IterCount>()
            .unwrap()
            .0,
        1
    );
}

struct FirstDone(Vec<Instant>);
struct SecondStarted(Vec<Instant>);

#[test]
fn after_orders_every_iteration() {
    // No access conflict between the two observed systems, ordering comes
    // from the declared edge alone.
    fn first_system(mut done: ResMut<FirstDone>) {
        done.0.push(Instant::now());
    }

    fn second_system(mut started: ResMut<SecondStarted>) {
        started.0.push(Instant::now());
    }

    let mut app = App::new();
    app.insert_resource(IterCount(0))
        .insert_resource(FirstDone(Vec::new()))
        .insert_resource(SecondStarted(Vec::new()))
        .enable_loop();
    app.add_system(First, drive_iterations::<1000>);
    app.add_system(Update, second_system).after(first_system);
    app.add_system(Update, first_system);
    app.run().unwrap();

    let main = app.sub_app::<cadence::MainApp>();
    let world = main.world();
    let first = world.resource::<FirstDone>().unwrap();
    let second = world.resource::<SecondStarted>().unwrap();
    assert_eq!(first.0.len(), 1000);
    assert_eq!(second.0.len(), 1000);
    for (done, started) in first.0.iter().zip(second.0.iter()) {
        assert!(done <= started);
    }
}

struct Counter(u64);

static IN_CRITICAL: AtomicBool = AtomicBool::new(false);

#[test]
fn conflicting_systems_never_overlap() {
    fn bump(mut counter: ResMut<Counter>) {
        assert!(
            !IN_CRITICAL.swap(true, Ordering::SeqCst),
            "two writers of Counter ran concurrently"
        );
        let next = counter.0 + 1;
        std::thread::yield_now();
        counter.0 = next;
        IN_CRITICAL.store(false, Ordering::SeqCst);
    }

    // Distinct function items, same body shape, both writing Counter
    fn bump_a(counter: ResMut<Counter>) {
        bump(counter);
    }
    fn bump_b(counter: ResMut<Counter>) {
        bump(counter);
    }

    const N: u32 = 50;

    let mut app = App::new();
    app.insert_resource(IterCount(0))
        .insert_resource(Counter(0))
        .enable_loop();
    app.add_system(First, drive_iterations::<N>);
    app.add_system(Update, bump_a);
    app.add_system(Update, bump_b);
    app.run().unwrap();

    assert_eq!(
        app.sub_app::<cadence::MainApp>()
            .world()
            .resource::<Counter>()
            .unwrap()
            .0,
        2 * N as u64
    );
}

struct Root(Entity);
struct Leaf;
cadence::component!(Leaf);

#[test]
fn recursive_despawn_destroys_the_tree() {
    fn spawn_tree(mut cmd: Commands) {
        let mut root = cmd.spawn(Leaf);
        let root_id = root.id();
        for _ in 0..2 {
            let mut mid = root.spawn(Leaf);
            for _ in 0..2 {
                let mut inner = mid.spawn(Leaf);
                for _ in 0..2 {
                    inner.spawn(Leaf);
                }
            }
        }
        cmd.insert_resource(Root(root_id));
    }

    fn despawn_root(mut cmd: Commands, root: Res<Root>) {
        let root = root.0;
        cmd.entity(root).despawn_recursive();
    }

    let mut app = App::new();
    app.add_system(Startup, spawn_tree);
    app.add_system(Update, despawn_root);
    app.run().unwrap();

    let main = app.sub_app::<cadence::MainApp>();
    let world = main.world();
    assert_eq!(world.entity_count(), 0);
    let root = world.resource::<Root>().unwrap().0;
    assert!(!world.contains(root));
    assert!(world.children(root).is_empty());
}

struct Ping;
struct Seen(Vec<(u32, usize)>);

#[test]
fn events_live_for_exactly_two_iterations() {
    fn write_on_first(iter: Res<IterCount>, mut ping: EventWriter<Ping>) {
        if iter.0 == 1 {
            ping.send(Ping);
        }
    }

    fn observe(iter: Res<IterCount>, ping: EventReader<Ping>, mut seen: ResMut<Seen>) {
        seen.0.push((iter.0, ping.len()));
    }

    let mut app = App::new();
    app.insert_resource(IterCount(0))
        .insert_resource(Seen(Vec::new()))
        .add_event::<Ping>()
        .enable_loop();
    app.add_system(First, drive_iterations::<4>);
    app.add_system(Update, write_on_first);
    app.add_system(Update, observe).after(write_on_first);
    app.run().unwrap();

    let main = app.sub_app::<cadence::MainApp>();
    let seen = main.world().resource::<Seen>().unwrap();
    assert_eq!(&seen.0[..3], &[(1, 1), (2, 1), (3, 0)]);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Menu,
    Playing,
}

struct EnterLog(Vec<u32>);

#[test]
fn on_enter_fires_exactly_on_the_transition() {
    fn request_playing(iter: Res<IterCount>, mut next: cadence::NextState<Mode>) {
        if iter.0 == 5 {
            next.set(Mode::Playing);
        }
    }

    fn entered_playing(iter: Res<IterCount>, mut log: ResMut<EnterLog>) {
        log.0.push(iter.0);
    }

    let mut app = App::new();
    app.insert_resource(IterCount(0))
        .insert_resource(EnterLog(Vec::new()))
        .init_state::<Mode>()
        .enable_loop();
    app.add_system(First, drive_iterations::<8>);
    app.add_system(Update, request_playing);
    app.add_system(StateTransit, entered_playing)
        .on_enter(Mode::Playing);
    app.run().unwrap();

    let main = app.sub_app::<cadence::MainApp>();
    assert_eq!(main.world().resource::<EnterLog>().unwrap().0, [5]);
}

#[test]
fn run_if_skips_without_completing_conditions() {
    fn gate(allow: Res<bool>) -> bool {
        allow.has_value() && *allow
    }

    fn guarded(mut counter: ResMut<Counter>) {
        counter.0 += 1;
    }

    fn count(mut counter: ResMut<IterCount>, mut exit: EventWriter<AppExit>) {
        counter.0 += 1;
        if counter.0 >= 4 {
            exit.send(AppExit);
        }
    }

    let mut app = App::new();
    app.insert_resource(Counter(0))
        .insert_resource(IterCount(0))
        .insert_resource(false)
        .enable_loop();
    app.add_system(First, count);
    app.add_system(Update, guarded).run_if(gate);
    app.run().unwrap();

    assert_eq!(
        app.sub_app::<cadence::MainApp>()
            .world()
            .resource::<Counter>()
            .unwrap()
            .0,
        0
    );
}

#[test]
fn locals_are_private_per_system() {
    fn accumulate(mut total: Local<u32>, mut out: ResMut<Counter>) {
        *total += 1;
        out.0 = *total as u64;
    }

    let mut app = App::new();
    app.insert_resource(Counter(0))
        .insert_resource(IterCount(0))
        .enable_loop();
    app.add_system(First, drive_iterations::<3>);
    app.add_system(Update, accumulate);
    app.run().unwrap();

    assert_eq!(
        app.sub_app::<cadence::MainApp>()
            .world()
            .resource::<Counter>()
            .unwrap()
            .0,
        3
    );
}
