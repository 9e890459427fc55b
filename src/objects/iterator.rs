use super::Object;

// Each iterator snapshots its source when created. `next` must be called
// before the first `key`/`value`; once it has returned false it keeps
// returning false.

#[derive(Debug, Clone)]
pub struct ArrayIterator {
    items: Vec<Object>,
    pos: usize,
}

impl ArrayIterator {
    pub fn new(items: Vec<Object>) -> Self {
        Self { items, pos: 0 }
    }

    pub fn next(&mut self) -> bool {
        if self.pos <= self.items.len() {
            self.pos += 1;
        }
        self.pos <= self.items.len()
    }

    pub fn key(&self) -> Object {
        Object::Int(self.pos.saturating_sub(1) as i64)
    }

    pub fn value(&self) -> Object {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.items.get(i))
            .cloned()
            .unwrap_or(Object::Undefined)
    }
}

#[derive(Debug, Clone)]
pub struct StringIterator {
    chars: Vec<char>,
    pos: usize,
}

impl StringIterator {
    pub fn new(s: &str) -> Self {
        Self {
            chars: s.chars().collect(),
            pos: 0,
        }
    }

    pub fn next(&mut self) -> bool {
        if self.pos <= self.chars.len() {
            self.pos += 1;
        }
        self.pos <= self.chars.len()
    }

    pub fn key(&self) -> Object {
        Object::Int(self.pos.saturating_sub(1) as i64)
    }

    pub fn value(&self) -> Object {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.chars.get(i))
            .map(|c| Object::Char(*c))
            .unwrap_or(Object::Undefined)
    }
}

#[derive(Debug, Clone)]
pub struct MapIterator {
    entries: Vec<(String, Object)>,
    pos: usize,
}

impl MapIterator {
    pub fn new(entries: Vec<(String, Object)>) -> Self {
        Self { entries, pos: 0 }
    }

    pub fn next(&mut self) -> bool {
        if self.pos <= self.entries.len() {
            self.pos += 1;
        }
        self.pos <= self.entries.len()
    }

    pub fn key(&self) -> Object {
        self.current()
            .map(|(k, _)| Object::string(k.as_str()))
            .unwrap_or(Object::Undefined)
    }

    pub fn value(&self) -> Object {
        self.current()
            .map(|(_, v)| v.clone())
            .unwrap_or(Object::Undefined)
    }

    fn current(&self) -> Option<&(String, Object)> {
        self.pos.checked_sub(1).and_then(|i| self.entries.get(i))
    }
}
