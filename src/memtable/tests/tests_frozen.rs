#[cfg(test)]
mod tests {
    use crate::command::{self, Command};
    use crate::memtable::Memtable;

    fn table(cmds: &[Command]) -> Memtable {
        let mut t = Memtable::new(2);
        for cmd in cmds {
            t.append(cmd.clone());
        }
        t
    }

    #[test]
    fn freeze_sorts_and_dedups() {
        let frozen = table(&[
            Command::set("c", "1"),
            Command::set("a", "2"),
            Command::set("c", "3"),
            Command::delete("b"),
            Command::set("a", "4"),
        ])
        .freeze();

        let keys: Vec<&str> = frozen.commands().iter().map(Command::key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(frozen.len(), 3);
        assert_eq!(frozen.query("a").unwrap().value(), "4");
        assert!(frozen.query("b").unwrap().is_delete());
        assert_eq!(frozen.query("c").unwrap().value(), "3");
        assert!(frozen.query("d").is_none());
    }

    #[test]
    fn frozen_answers_match_active() {
        let cmds: Vec<Command> = (0..50)
            .map(|i| {
                let key = format!("k{:02}", (i * 7) % 13);
                if i % 5 == 0 {
                    Command::delete(key)
                } else {
                    Command::set(key, format!("v{i}"))
                }
            })
            .collect();
        let active = table(&cmds);
        let expected: Vec<Option<Command>> = (0..13)
            .map(|k| active.query(&format!("k{k:02}")).cloned())
            .collect();

        let frozen = active.freeze();
        for (k, want) in expected.iter().enumerate() {
            assert_eq!(frozen.query(&format!("k{k:02}")), want.as_ref());
        }
    }

    #[test]
    fn min_max_and_generation() {
        let frozen = table(&[Command::set("m", "1"), Command::set("b", "2"), Command::set("x", "3")])
            .freeze();
        assert_eq!(frozen.min_key(), Some("b"));
        assert_eq!(frozen.max_key(), Some("x"));
        assert_eq!(frozen.generation(), 2);
    }

    #[test]
    fn frozen_bytes_are_sorted() {
        let frozen = table(&[Command::set("b", "1"), Command::set("a", "2")]).freeze();
        let (count, body) = frozen.bytes().unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            command::decode_framed_all(&body).unwrap(),
            vec![Command::set("a", "2"), Command::set("b", "1")]
        );
    }

    #[test]
    fn empty_freeze() {
        let frozen = Memtable::new(0).freeze();
        assert!(frozen.is_empty());
        assert!(frozen.min_key().is_none());
    }
}
