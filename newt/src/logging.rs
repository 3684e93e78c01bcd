use newt_msg::Message;

pub(crate) fn msg_summary(msg: &Message) -> String {
  format!("{:?}: {:?} {} with {} byte payload",
          msg.code.kind(),
          msg.ty,
          msg.code,
          msg.payload.0.len())
}
