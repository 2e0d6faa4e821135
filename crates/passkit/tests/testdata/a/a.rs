pub fn wrap() { // want wrap:"Panics" a:"Checked\(2\)"
    b::boom(); // want "call of b.boom may panic"
}

pub fn fine() {
    b::calm();
}
